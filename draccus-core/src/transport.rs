//! The seam between the poller and the remote queue service.
use crate::Result;
use crate::message::{Message, ReceiptHandle};

/// Amazon SQS implementation.
pub(crate) mod sqs;

/// Parameters of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout_seconds: i32,
}

/// One entry of a batch delete; `id` only has to be unique within its batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub id: String,
    pub handle: ReceiptHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDelete {
    pub id: String,
    pub code: String,
    pub message: Option<String>,
    pub sender_fault: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedDelete>,
}

/// Approximate counts of messages still owned by the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub visible: u64,
    pub in_flight: u64,
    pub delayed: u64,
}

impl QueueCounts {
    /// Nothing visible, nothing leased elsewhere, nothing delayed.
    pub fn is_drained(&self) -> bool {
        self.visible == 0 && self.in_flight == 0 && self.delayed == 0
    }
}

/// Operations the [crate::sink::Sink] needs from the queue service.
#[trait_variant::make(QueueTransport: Send)]
#[allow(dead_code)]
pub trait LocalQueueTransport {
    /// Receive up to `max_messages`; an empty vec means the long poll timed out.
    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<Message>>;

    /// Delete at most 10 messages in one call.
    async fn delete_batch(&self, entries: Vec<DeleteEntry>) -> Result<DeleteOutcome>;

    async fn queue_counts(&self) -> Result<QueueCounts>;
}
