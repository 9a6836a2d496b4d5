use std::time::Duration;

use backoff::retry::Retry;
use backoff::strategy::linear::Linear;
use bytes::Bytes;
use draccus_s3::S3Bucket;
use tracing::warn;

use crate::Result;
use crate::writer::Writer;

/// Reattempts of a failed put before the batch is given up.
const PUT_RETRIES: usize = 3;
const PUT_RETRY_STEP: Duration = Duration::from_millis(500);
const PUT_RETRY_MAX_INTERVAL: Duration = Duration::from_secs(2);

impl Writer for S3Bucket {
    async fn write(&self, data: Bytes, name: &str) -> Result<String> {
        let backoff = Linear::new(PUT_RETRY_STEP, PUT_RETRY_STEP, PUT_RETRY_MAX_INTERVAL)
            .take(PUT_RETRIES);

        Retry::new(
            backoff,
            || self.put_object(name, data.clone()),
            |e: &draccus_s3::Error| {
                let transient = matches!(e, draccus_s3::Error::S3(_));
                if transient {
                    warn!(?e, bucket = self.name(), key = name, "Put failed, retrying");
                }
                transient
            },
        )
        .await?;

        Ok(format!("Bucket: {}, File: {name}", self.name()))
    }

    async fn verify_writable(&self) -> Result<bool> {
        Ok(S3Bucket::verify_writable(self).await?)
    }
}
