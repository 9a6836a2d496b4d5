//! Amazon SQS plumbing for draccus.
//!
//! This crate owns everything that talks to the SQS API:
//! - creating a client from region/credential/endpoint settings ([client])
//! - resolving a queue name to its URL and the receive / batch-delete / attribute / batch-send
//!   calls against that queue ([queue])
//!
//! It knows nothing about batching or acknowledgement policy; that lives in `draccus-core`.
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_config::BehaviorVersion;

pub mod client;
pub mod queue;

/// SQS rejects receive and batch requests asking for more than this many entries.
pub const MAX_BATCH_SIZE: usize = 10;

/// Upper bound for long polling.
pub const MAX_WAIT_TIME_SECONDS: i32 = 20;

/// Upper bound for the visibility timeout (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: i32 = 43_200;

pub const SQS_DEFAULT_REGION: &str = "us-west-2";

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Failed with SQS error - {0}")]
    Sqs(String),

    #[error("Invalid configuration - {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = core::result::Result<T, Error>;

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Other(value)
    }
}

pub fn aws_behavior_version() -> BehaviorVersion {
    BehaviorVersion::latest()
}

/// Flattens an SDK error into `code: message`, falling back to the full error chain when the
/// service did not return modeled metadata (timeouts, dispatch failures).
pub(crate) fn extract_aws_error<E, R>(err: &SdkError<E, R>) -> String
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(code), None) => code.to_string(),
        _ => DisplayErrorContext(err).to_string(),
    }
}
