use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Receive, delete or attribute call failed. Never fatal; the poller backs off and retries.
    #[error("Transport Error - {0}")]
    Transport(String),

    /// The backend could not persist a batch.
    #[error("Write Error - {0}")]
    Write(String),

    #[error("Store Error - {0}")]
    Store(String),

    #[error("Config Error - {0}")]
    Config(String),

    /// An unexpected failure inside a polling loop. The process must not carry on.
    #[error("Fatal Error - {0}")]
    Fatal(String),
}

impl From<draccus_sqs::Error> for Error {
    fn from(value: draccus_sqs::Error) -> Self {
        match value {
            draccus_sqs::Error::InvalidConfig(e) => Error::Config(e),
            draccus_sqs::Error::Sqs(_) | draccus_sqs::Error::Other(_) => {
                Error::Transport(value.to_string())
            }
        }
    }
}

impl From<draccus_s3::Error> for Error {
    fn from(value: draccus_s3::Error) -> Self {
        match value {
            draccus_s3::Error::InvalidConfig(e) => Error::Config(e),
            draccus_s3::Error::S3(_) | draccus_s3::Error::Other(_) => Error::Write(value.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Write(value.to_string())
    }
}
