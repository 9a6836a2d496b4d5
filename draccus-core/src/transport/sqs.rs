use draccus_sqs::queue::{BatchOutcome, FailedEntry, ReceivedMessage, SqsQueue};
use tracing::error;

use crate::message::Message;
use crate::tools::MessageSender;
use crate::transport::{
    DeleteEntry, DeleteOutcome, FailedDelete, QueueCounts, QueueTransport, ReceiveRequest,
};

impl From<ReceivedMessage> for Message {
    fn from(msg: ReceivedMessage) -> Self {
        Message::new(msg.receipt_handle, msg.payload)
    }
}

impl From<FailedEntry> for FailedDelete {
    fn from(entry: FailedEntry) -> Self {
        FailedDelete {
            id: entry.id,
            code: entry.code,
            message: entry.message,
            sender_fault: entry.sender_fault,
        }
    }
}

impl From<BatchOutcome> for DeleteOutcome {
    fn from(outcome: BatchOutcome) -> Self {
        DeleteOutcome {
            succeeded: outcome.successful,
            failed: outcome.failed.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<draccus_sqs::queue::QueueCounts> for QueueCounts {
    fn from(counts: draccus_sqs::queue::QueueCounts) -> Self {
        QueueCounts {
            visible: counts.visible,
            in_flight: counts.in_flight,
            delayed: counts.delayed,
        }
    }
}

impl QueueTransport for SqsQueue {
    async fn receive(&self, request: ReceiveRequest) -> crate::Result<Vec<Message>> {
        let messages = self
            .receive_messages(
                request.max_messages,
                request.wait_time_seconds,
                request.visibility_timeout_seconds,
            )
            .await?;
        Ok(messages.into_iter().map(Message::from).collect())
    }

    async fn delete_batch(&self, entries: Vec<DeleteEntry>) -> crate::Result<DeleteOutcome> {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.id, entry.handle.as_str().to_string()))
            .collect();
        Ok(self.delete_messages(entries).await?.into())
    }

    async fn queue_counts(&self) -> crate::Result<QueueCounts> {
        Ok(SqsQueue::queue_counts(self).await?.into())
    }
}

impl MessageSender for SqsQueue {
    async fn send_batch(&self, bodies: Vec<String>) -> crate::Result<usize> {
        let outcome = self.send_messages(bodies).await?;
        for failed in &outcome.failed {
            error!(
                id = %failed.id,
                code = %failed.code,
                message = ?failed.message,
                "Failed to send message"
            );
        }
        Ok(outcome.successful.len())
    }
}
