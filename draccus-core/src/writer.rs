//! Backends the [crate::store::Store] persists batches into.
use bytes::Bytes;

use crate::Result;

/// Local directory.
pub mod file;

/// Standard output.
pub mod console;

/// Amazon S3 bucket.
pub mod s3;

/// Persists one serialized batch. Implementations may retry transient failures internally, an
/// error means the batch was not persisted and will not be acknowledged.
#[trait_variant::make(Writer: Send)]
#[allow(dead_code)]
pub trait LocalWriter {
    /// Writes `data` under `name` and returns a human readable identifier of where it went.
    async fn write(&self, data: Bytes, name: &str) -> Result<String>;

    /// Pre-flight check run once at startup; `false` aborts the drain.
    async fn verify_writable(&self) -> Result<bool>;
}
