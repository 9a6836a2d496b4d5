//! Drains an SQS queue into files, an S3 bucket or the console with at-least-once delivery.
//!
//! The [sink::Sink] polls the queue and hands batches to the [store::Store], which buffers them
//! and periodically writes them through a [writer::Writer]. Messages are deleted from the queue
//! only after the batch containing them was written.

pub use self::error::{Error, Result};

mod error;

pub mod config;
pub mod message;
pub mod sink;
pub mod store;
pub mod tools;
pub mod transport;
pub mod writer;

/// Wires queue, sink, store and backend together for one drain.
mod drain;
pub use crate::drain::{DrainSummary, drain_with, run};

#[cfg(test)]
pub(crate) mod test_utils;
