//! Vendor descriptor providers and backend selection.
//!
//! The vendor APIs below detect faces but return no comparable embedding;
//! their descriptors carry an empty encoding and always take the unknown
//! path. They exist so the pipeline can be wired against real services.

mod azure;
mod google;
mod rekognition;

pub use azure::AzureProvider;
pub use google::GoogleVisionProvider;
pub use rekognition::RekognitionProvider;

use crate::config::{Config, ProviderKind};
use std::sync::Arc;
use std::time::Duration;
use vigil_core::{DescriptorProvider, MockProvider, ProviderError};

/// Build the configured provider.
pub fn build_provider(config: &Config) -> Result<Arc<dyn DescriptorProvider>, ProviderError> {
    let provider: Arc<dyn DescriptorProvider> = match config.provider {
        ProviderKind::Mock => Arc::new(MockProvider::new(config.mock_mode)),
        ProviderKind::Azure => Arc::new(AzureProvider::new(
            http_client(config.extract_timeout())?,
            required(&config.provider_endpoint, "VIGIL_PROVIDER_ENDPOINT")?,
            required(&config.provider_api_key, "VIGIL_PROVIDER_API_KEY")?,
        )),
        ProviderKind::Google => Arc::new(GoogleVisionProvider::new(
            http_client(config.extract_timeout())?,
            config.provider_endpoint.clone(),
            required(&config.provider_api_key, "VIGIL_PROVIDER_API_KEY")?,
        )),
        ProviderKind::Aws => Arc::new(RekognitionProvider::new(
            http_client(config.extract_timeout())?,
            required(&config.provider_endpoint, "VIGIL_PROVIDER_ENDPOINT")?,
            required(&config.provider_api_key, "VIGIL_PROVIDER_API_KEY")?,
        )),
    };
    tracing::info!(provider = provider.name(), "descriptor provider ready");
    Ok(provider)
}

fn required(value: &Option<String>, key: &str) -> Result<String, ProviderError> {
    value
        .clone()
        .ok_or_else(|| ProviderError::Misconfigured(format!("{key} is not set")))
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Misconfigured(format!("http client: {e}")))
}

/// Map a transport-level failure or non-success status to a provider error.
async fn checked(
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<reqwest::Response, ProviderError> {
    let response = response.map_err(|e| ProviderError::Unavailable(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Unavailable(format!("{status}: {body}")))
}

fn malformed(err: serde_json::Error) -> ProviderError {
    ProviderError::Unavailable(format!("malformed response: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: ProviderKind) -> Config {
        let mut config = crate::config::test_config(&[]).unwrap();
        config.provider = provider;
        config.provider_endpoint = None;
        config.provider_api_key = None;
        config
    }

    #[test]
    fn test_mock_needs_no_credentials() {
        let provider = build_provider(&config(ProviderKind::Mock)).unwrap();
        assert_eq!(provider.name(), "mock");
    }

    #[test]
    fn test_vendor_without_credentials_is_misconfigured() {
        for kind in [ProviderKind::Azure, ProviderKind::Google, ProviderKind::Aws] {
            let err = build_provider(&config(kind)).err().unwrap();
            assert!(matches!(err, ProviderError::Misconfigured(_)), "{kind:?}");
        }
    }

    #[test]
    fn test_vendor_with_credentials_builds() {
        let mut cfg = config(ProviderKind::Azure);
        cfg.provider_endpoint = Some("https://example.cognitiveservices.azure.com".into());
        cfg.provider_api_key = Some("key".into());
        assert_eq!(build_provider(&cfg).unwrap().name(), "azure");
    }
}
