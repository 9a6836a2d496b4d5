//! Options as the operator supplies them (options file plus command line) and the validated
//! [Settings] a drain runs with.
use std::path::{Path, PathBuf};
use std::time::Duration;

use draccus_s3::S3ClientConfig;
use draccus_sqs::client::{AwsCredentials, SqsClientConfig};
use serde::Deserialize;

use crate::Error;
use crate::Result;
use crate::sink::{DEFAULT_MAX_MESSAGES, DEFAULT_WAIT_TIME_SECONDS, SinkConfig};
use crate::store::{FilenamePattern, StoreConfig};

const DEFAULT_FLUSH_FREQUENCY_SECS: u64 = 60;
const DEFAULT_MAX_CONCURRENT_RECEIVERS: usize = 1;

/// Everything is optional here; [Settings::try_from] decides what is required.
#[derive(Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub queue_name: Option<String>,
    pub s3_bucket: Option<String>,
    pub out_dir: Option<PathBuf>,
    pub stdout: Option<bool>,
    pub flush_frequency: Option<u64>,
    pub filename_pattern: Option<String>,
    pub log_file: Option<PathBuf>,
    pub log_raw_message: Option<bool>,
    pub max_concurrent_receivers: Option<usize>,
    pub daemon: Option<bool>,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "***"),
            )
            .field("endpoint_url", &self.endpoint_url)
            .field("queue_name", &self.queue_name)
            .field("s3_bucket", &self.s3_bucket)
            .field("out_dir", &self.out_dir)
            .field("stdout", &self.stdout)
            .field("flush_frequency", &self.flush_frequency)
            .field("filename_pattern", &self.filename_pattern)
            .field("log_file", &self.log_file)
            .field("log_raw_message", &self.log_raw_message)
            .field("max_concurrent_receivers", &self.max_concurrent_receivers)
            .field("daemon", &self.daemon)
            .finish()
    }
}

impl Options {
    /// Reads a JSON options file. Unknown keys are ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Unable to load options from {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
            .map_err(|e| Error::Config(format!("Invalid options in {}: {e}", path.display())))
    }

    pub fn from_json(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Every value set in `overrides` replaces the one in `self`.
    pub fn merge(self, overrides: Options) -> Options {
        Options {
            region: overrides.region.or(self.region),
            access_key_id: overrides.access_key_id.or(self.access_key_id),
            secret_access_key: overrides.secret_access_key.or(self.secret_access_key),
            endpoint_url: overrides.endpoint_url.or(self.endpoint_url),
            queue_name: overrides.queue_name.or(self.queue_name),
            s3_bucket: overrides.s3_bucket.or(self.s3_bucket),
            out_dir: overrides.out_dir.or(self.out_dir),
            stdout: overrides.stdout.or(self.stdout),
            flush_frequency: overrides.flush_frequency.or(self.flush_frequency),
            filename_pattern: overrides.filename_pattern.or(self.filename_pattern),
            log_file: overrides.log_file.or(self.log_file),
            log_raw_message: overrides.log_raw_message.or(self.log_raw_message),
            max_concurrent_receivers: overrides
                .max_concurrent_receivers
                .or(self.max_concurrent_receivers),
            daemon: overrides.daemon.or(self.daemon),
        }
    }

    pub fn queue_name(&self) -> Result<String> {
        match self.queue_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Ok(name.to_string()),
            _ => Err(Error::Config("queue name is required".to_string())),
        }
    }

    pub fn sqs_client_config(&self) -> Result<SqsClientConfig> {
        let config = SqsClientConfig {
            region: self.region()?,
            credentials: self.credentials()?.map(|(access_key_id, secret_access_key)| {
                AwsCredentials {
                    access_key_id,
                    secret_access_key,
                }
            }),
            endpoint_url: self.endpoint_url.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn s3_client_config(&self) -> Result<S3ClientConfig> {
        Ok(S3ClientConfig {
            region: self.region()?,
            credentials: self.credentials()?,
            endpoint_url: self.endpoint_url.clone(),
        })
    }

    fn region(&self) -> Result<String> {
        match self.region.as_deref() {
            Some(region) if !region.is_empty() => Ok(region.to_string()),
            _ => Err(Error::Config("region is required".to_string())),
        }
    }

    fn credentials(&self) -> Result<Option<(String, String)>> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Ok(Some((id.clone(), secret.clone()))),
            (None, None) => Ok(None),
            _ => Err(Error::Config(
                "access key id and secret access key must be given together".to_string(),
            )),
        }
    }
}

/// Where flushed batches go.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    S3 { bucket: String },
    File { out_dir: PathBuf },
    Console,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::S3 { bucket } => write!(f, "s3 bucket {bucket}"),
            Backend::File { out_dir } => write!(f, "directory {}", out_dir.display()),
            Backend::Console => write!(f, "console"),
        }
    }
}

/// Validated configuration of a drain.
#[derive(Debug, Clone)]
pub struct Settings {
    pub queue_name: String,
    pub sqs: SqsClientConfig,
    /// Only set for [Backend::S3].
    pub s3: Option<S3ClientConfig>,
    pub backend: Backend,
    pub flush_interval: Duration,
    pub filename_pattern: FilenamePattern,
    /// Bounded drain; `false` in daemon mode.
    pub stop_when_empty: bool,
    pub max_concurrent_receivers: usize,
    /// Store the whole received message as JSON instead of its body.
    pub raw_messages: bool,
    pub visibility_timeout_seconds: i32,
    pub max_messages: i32,
    pub wait_time_seconds: i32,
}

impl TryFrom<Options> for Settings {
    type Error = Error;

    fn try_from(options: Options) -> Result<Self> {
        let queue_name = options.queue_name()?;
        let sqs = options.sqs_client_config()?;

        let backend = if let Some(bucket) = options.s3_bucket.clone().filter(|b| !b.is_empty()) {
            Backend::S3 { bucket }
        } else if let Some(out_dir) = options.out_dir.clone().filter(|d| !d.as_os_str().is_empty())
        {
            Backend::File { out_dir }
        } else if options.stdout.unwrap_or(false) {
            Backend::Console
        } else {
            return Err(Error::Config(
                "one of --stdout, --out-dir or --s3-bucket is required".to_string(),
            ));
        };
        let s3 = match backend {
            Backend::S3 { .. } => Some(options.s3_client_config()?),
            _ => None,
        };

        let flush_frequency = options
            .flush_frequency
            .unwrap_or(DEFAULT_FLUSH_FREQUENCY_SECS);
        if flush_frequency == 0 {
            return Err(Error::Config("flush frequency must be positive".to_string()));
        }

        let max_concurrent_receivers = options
            .max_concurrent_receivers
            .unwrap_or(DEFAULT_MAX_CONCURRENT_RECEIVERS);
        if max_concurrent_receivers == 0 {
            return Err(Error::Config(
                "max concurrent receivers must be at least 1".to_string(),
            ));
        }

        let visibility_timeout_seconds = visibility_timeout(flush_frequency)?;

        let filename_pattern = match options.filename_pattern.as_deref() {
            Some(pattern) => FilenamePattern::new(pattern)?,
            None => FilenamePattern::default(),
        };

        let settings = Settings {
            queue_name,
            sqs,
            s3,
            backend,
            flush_interval: Duration::from_secs(flush_frequency),
            filename_pattern,
            stop_when_empty: !options.daemon.unwrap_or(false),
            max_concurrent_receivers,
            raw_messages: options.log_raw_message.unwrap_or(false),
            visibility_timeout_seconds,
            max_messages: DEFAULT_MAX_MESSAGES,
            wait_time_seconds: DEFAULT_WAIT_TIME_SECONDS,
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let max_batch = draccus_sqs::MAX_BATCH_SIZE as i32;
        if !(1..=max_batch).contains(&self.max_messages) {
            return Err(Error::Config(format!(
                "max messages must be between 1 and {max_batch}"
            )));
        }
        if !(0..=draccus_sqs::MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            return Err(Error::Config(format!(
                "wait time must be between 0 and {} seconds",
                draccus_sqs::MAX_WAIT_TIME_SECONDS
            )));
        }
        if !(0..=draccus_sqs::MAX_VISIBILITY_TIMEOUT_SECONDS)
            .contains(&self.visibility_timeout_seconds)
        {
            return Err(Error::Config(format!(
                "visibility timeout must be between 0 and {} seconds",
                draccus_sqs::MAX_VISIBILITY_TIMEOUT_SECONDS
            )));
        }
        Ok(())
    }

    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            max_messages: self.max_messages,
            wait_time_seconds: self.wait_time_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
            stop_when_empty: self.stop_when_empty,
            max_concurrent_receivers: self.max_concurrent_receivers,
            exit_on_errors: true,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            flush_interval: self.flush_interval,
            filename_pattern: self.filename_pattern.clone(),
            exit_on_errors: true,
        }
    }
}

/// A message must stay leased long enough for its batch to be flushed and acknowledged, so the
/// lease is the flush interval plus 25%.
fn visibility_timeout(flush_frequency_secs: u64) -> Result<i32> {
    let secs = flush_frequency_secs.saturating_mul(5).div_ceil(4);
    i32::try_from(secs)
        .ok()
        .filter(|secs| *secs <= draccus_sqs::MAX_VISIBILITY_TIMEOUT_SECONDS)
        .ok_or_else(|| {
            Error::Config(format!(
                "flush frequency of {flush_frequency_secs}s needs a visibility timeout above the \
                 {}s limit",
                draccus_sqs::MAX_VISIBILITY_TIMEOUT_SECONDS
            ))
        })
}
