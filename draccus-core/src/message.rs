use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

/// Opaque token proving a lease on one delivery of a message. Required to delete it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiptHandle(Arc<str>);

impl ReceiptHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReceiptHandle {
    fn from(value: &str) -> Self {
        ReceiptHandle(Arc::from(value))
    }
}

impl From<String> for ReceiptHandle {
    fn from(value: String) -> Self {
        ReceiptHandle(Arc::from(value))
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message received from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub handle: ReceiptHandle,
    pub body: Bytes,
}

impl Message {
    pub fn new(handle: impl Into<ReceiptHandle>, body: impl Into<Bytes>) -> Self {
        Self {
            handle: handle.into(),
            body: body.into(),
        }
    }
}

/// Messages accumulated by the store between two flushes, keyed by receipt handle.
///
/// A handle seen twice keeps its first position and takes the latest body. Iteration follows
/// first arrival, which keeps the serialized output stable.
#[derive(Debug, Default)]
pub struct PendingBatch {
    positions: HashMap<ReceiptHandle, usize>,
    entries: Vec<(ReceiptHandle, Bytes)>,
}

impl PendingBatch {
    pub fn insert(&mut self, handle: ReceiptHandle, body: Bytes) {
        match self.positions.get(&handle) {
            Some(&pos) => {
                if let Some(entry) = self.entries.get_mut(pos) {
                    entry.1 = body;
                }
            }
            None => {
                self.positions.insert(handle.clone(), self.entries.len());
                self.entries.push((handle, body));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bodies each terminated by a newline.
    pub fn serialize(&self) -> Bytes {
        let size = self.entries.iter().map(|(_, b)| b.len() + 1).sum();
        let mut buf = BytesMut::with_capacity(size);
        for (_, body) in &self.entries {
            buf.extend_from_slice(body);
            buf.extend_from_slice(b"\n");
        }
        buf.freeze()
    }

    pub fn into_handles(self) -> Vec<ReceiptHandle> {
        self.entries.into_iter().map(|(handle, _)| handle).collect()
    }
}

impl Extend<Message> for PendingBatch {
    fn extend<T: IntoIterator<Item = Message>>(&mut self, iter: T) {
        for msg in iter {
            self.insert(msg.handle, msg.body);
        }
    }
}
