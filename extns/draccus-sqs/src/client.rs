use aws_config::{Region, meta::region::RegionProviderChain};
use aws_sdk_sqs::Client;
use aws_sdk_sqs::config::Credentials;

use crate::{Error, Result, SQS_DEFAULT_REGION, aws_behavior_version};

/// Static access key pair. When absent the default provider chain (env, profile, IMDS) is used.
#[derive(Clone, PartialEq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqsClientConfig {
    pub region: String,
    pub credentials: Option<AwsCredentials>,
    /// Overrides the service endpoint, e.g. a local emulator.
    pub endpoint_url: Option<String>,
}

impl SqsClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.region.is_empty() {
            return Err(Error::InvalidConfig("region is required".to_string()));
        }
        if let Some(creds) = &self.credentials
            && (creds.access_key_id.is_empty() || creds.secret_access_key.is_empty())
        {
            return Err(Error::InvalidConfig(
                "access key id and secret access key must both be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Creates an SQS client from the given configuration.
pub async fn create_sqs_client(config: SqsClientConfig) -> Result<Client> {
    config.validate()?;

    tracing::info!(region = config.region.clone(), "Creating SQS client in region");

    let region_provider = RegionProviderChain::first_try(Region::new(config.region.clone()))
        .or_default_provider()
        .or_else(Region::new(SQS_DEFAULT_REGION));

    let mut config_builder = aws_config::defaults(aws_behavior_version()).region(region_provider);

    if let Some(creds) = config.credentials {
        config_builder = config_builder.credentials_provider(Credentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            None,
            None,
            "draccus",
        ));
    }

    if let Some(endpoint_url) = config.endpoint_url {
        config_builder = config_builder.endpoint_url(endpoint_url);
    }

    let shared_config = config_builder.load().await;
    Ok(Client::new(&shared_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SqsClientConfig {
        SqsClientConfig {
            region: "us-west-2".to_string(),
            credentials: Some(AwsCredentials {
                access_key_id: "test-key".to_string(),
                secret_access_key: "test-secret".to_string(),
            }),
            endpoint_url: None,
        }
    }

    #[tokio::test]
    async fn test_client_creation_with_static_credentials() {
        assert!(create_sqs_client(config()).await.is_ok());
    }

    #[tokio::test]
    async fn test_client_creation_with_custom_endpoint() {
        let mut cfg = config();
        cfg.endpoint_url = Some("http://localhost:4566".to_string());
        assert!(create_sqs_client(cfg).await.is_ok());
    }

    #[tokio::test]
    async fn test_client_creation_validation_failures() {
        let mut cfg = config();
        cfg.region = "".to_string();
        let result = create_sqs_client(cfg).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let mut cfg = config();
        cfg.credentials = Some(AwsCredentials {
            access_key_id: "test-key".to_string(),
            secret_access_key: "".to_string(),
        });
        let result = create_sqs_client(cfg).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_credentials_are_redacted() {
        let rendered = format!("{:?}", config());
        assert!(rendered.contains("test-key"));
        assert!(!rendered.contains("test-secret"));
    }
}
