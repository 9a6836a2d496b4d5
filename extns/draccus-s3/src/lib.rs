//! Amazon S3 plumbing for draccus: client creation, the bucket writability check and object puts.
use aws_config::{BehaviorVersion, Region, meta::region::RegionProviderChain};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;

pub const S3_DEFAULT_REGION: &str = "us-west-2";

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Failed with S3 error - {0}")]
    S3(String),

    #[error("Invalid configuration - {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = core::result::Result<T, Error>;

pub fn aws_behavior_version() -> BehaviorVersion {
    BehaviorVersion::latest()
}

fn extract_aws_error<E, R>(err: &SdkError<E, R>) -> String
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

#[derive(Clone, PartialEq)]
pub struct S3ClientConfig {
    pub region: String,
    /// `(access_key_id, secret_access_key)`; the default provider chain is used when absent.
    pub credentials: Option<(String, String)>,
    /// Custom endpoint, e.g. a local emulator. Switches to path-style addressing.
    pub endpoint_url: Option<String>,
}

impl std::fmt::Debug for S3ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ClientConfig")
            .field("region", &self.region)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|(id, _)| (id, "***")),
            )
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

pub async fn create_s3_client(config: S3ClientConfig) -> Result<Client> {
    if config.region.is_empty() {
        return Err(Error::InvalidConfig("region is required".to_string()));
    }

    tracing::info!(region = config.region.clone(), "Creating S3 client in region");

    let region_provider = RegionProviderChain::first_try(Region::new(config.region.clone()))
        .or_default_provider()
        .or_else(Region::new(S3_DEFAULT_REGION));

    let mut loader = aws_config::defaults(aws_behavior_version()).region(region_provider);
    if let Some((access_key_id, secret_access_key)) = config.credentials {
        loader = loader.credentials_provider(Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            "draccus",
        ));
    }
    if let Some(endpoint_url) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }
    let shared_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
        .force_path_style(config.endpoint_url.is_some())
        .build();
    Ok(Client::from_conf(s3_config))
}

/// A bucket objects are written into.
#[derive(Clone, Debug)]
pub struct S3Bucket {
    client: Client,
    bucket: String,
}

impl S3Bucket {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.bucket
    }

    /// `HeadBucket` succeeds only if the bucket exists and the caller may access it.
    pub async fn verify_writable(&self) -> Result<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                tracing::error!(
                    bucket = self.bucket,
                    error = extract_aws_error(&err),
                    "Bucket is not writable"
                );
                Ok(false)
            }
        }
    }

    /// Writes `body` as a private `text/plain` object under `key`.
    pub async fn put_object(&self, key: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::Private)
            .content_type("text/plain")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| Error::S3(extract_aws_error(&err)))?;
        Ok(())
    }
}
