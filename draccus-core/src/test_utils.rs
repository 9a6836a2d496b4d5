//! In-memory fakes shared by the unit tests.
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::message::{Message, ReceiptHandle};
use crate::transport::{
    DeleteEntry, DeleteOutcome, FailedDelete, QueueCounts, QueueTransport, ReceiveRequest,
};
use crate::writer::Writer;

/// Scripted transport. Once the receive script runs out, receive calls never complete; once the
/// counts script runs out, the queue reports itself drained.
pub(crate) struct MockTransport {
    pub(crate) receives: Mutex<VecDeque<Result<Vec<Message>>>>,
    pub(crate) counts: Mutex<VecDeque<Result<QueueCounts>>>,
    pub(crate) counts_calls: AtomicUsize,
    pub(crate) requests: Mutex<Vec<ReceiveRequest>>,
    pub(crate) deletes: Mutex<Vec<Vec<DeleteEntry>>>,
    pub(crate) deleted: Notify,
    pub(crate) failing_handles: HashSet<ReceiptHandle>,
    pub(crate) fail_deletes: bool,
    receive_events: mpsc::UnboundedSender<Instant>,
}

impl MockTransport {
    pub(crate) fn new(
        receives: Vec<Result<Vec<Message>>>,
        counts: Vec<Result<QueueCounts>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Instant>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mock = MockTransport {
            receives: Mutex::new(receives.into()),
            counts: Mutex::new(counts.into()),
            counts_calls: AtomicUsize::new(0),
            requests: Mutex::new(vec![]),
            deletes: Mutex::new(vec![]),
            deleted: Notify::new(),
            failing_handles: HashSet::new(),
            fail_deletes: false,
            receive_events: tx,
        };
        (Arc::new(mock), rx)
    }

    pub(crate) fn receive_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Handles of every delete call so far, in call order.
    pub(crate) fn deleted_handles(&self) -> Vec<Vec<ReceiptHandle>> {
        self.deletes
            .lock()
            .iter()
            .map(|call| call.iter().map(|entry| entry.handle.clone()).collect())
            .collect()
    }
}

impl QueueTransport for Arc<MockTransport> {
    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<Message>> {
        self.requests.lock().push(request);
        let _ = self.receive_events.send(Instant::now());
        let next = self.receives.lock().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn delete_batch(&self, entries: Vec<DeleteEntry>) -> Result<DeleteOutcome> {
        self.deletes.lock().push(entries.clone());
        self.deleted.notify_one();
        if self.fail_deletes {
            return Err(Error::Transport("connection reset".to_string()));
        }
        let mut outcome = DeleteOutcome::default();
        for entry in entries {
            if self.failing_handles.contains(&entry.handle) {
                outcome.failed.push(FailedDelete {
                    id: entry.id,
                    code: "ReceiptHandleIsInvalid".to_string(),
                    message: None,
                    sender_fault: true,
                });
            } else {
                outcome.succeeded.push(entry.id);
            }
        }
        Ok(outcome)
    }

    async fn queue_counts(&self) -> Result<QueueCounts> {
        self.counts_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.counts.lock().pop_front();
        next.unwrap_or(Ok(QueueCounts::default()))
    }
}

/// Keeps every written batch in memory.
#[derive(Clone, Default)]
pub(crate) struct MemoryWriter {
    pub(crate) writes: Arc<Mutex<Vec<(Bytes, String)>>>,
    pub(crate) unwritable: bool,
}

impl Writer for MemoryWriter {
    async fn write(&self, data: Bytes, name: &str) -> Result<String> {
        self.writes.lock().push((data, name.to_string()));
        Ok(format!("memory://{name}"))
    }

    async fn verify_writable(&self) -> Result<bool> {
        Ok(!self.unwritable)
    }
}
