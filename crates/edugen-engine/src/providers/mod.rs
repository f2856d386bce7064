mod dryrun;
mod openrouter;

use std::collections::BTreeMap;

use anyhow::Result;
use edugen_contracts::categories::Frame;
use edugen_contracts::config::ApiConfig;
use serde_json::{Map, Value};

pub use dryrun::DryrunProvider;
pub use openrouter::{aspect_bucket, OpenRouterProvider};

use crate::util::ImageBytes;

/// Credential failures. These end the whole request and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ApiKeyError {
    #[error("No API key found. Enter a valid API Key")]
    Missing,
    #[error("Wrong API Key. Enter a valid API Key")]
    Invalid,
}

/// Finds an [`ApiKeyError`] anywhere in the chain.
pub fn api_key_error(err: &anyhow::Error) -> Option<ApiKeyError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ApiKeyError>().copied())
}

#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    /// Chat content parts, images first and the instruction text last.
    pub content: Vec<Value>,
    /// Requested output frame; refinements send none.
    pub frame: Option<Frame>,
    pub api_key: Option<String>,
    pub seed: u64,
}

impl ProviderRequest {
    pub fn instruction(&self) -> &str {
        self.content
            .iter()
            .rev()
            .find_map(|part| {
                (part.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| part.get("text").and_then(Value::as_str))
                    .flatten()
            })
            .unwrap_or_default()
    }

    pub fn image_count(&self) -> usize {
        self.content
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("image_url"))
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub image: ImageBytes,
    pub provider_request: Map<String, Value>,
    pub provider_response: Map<String, Value>,
    pub warnings: Vec<String>,
    pub attempts: u32,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse>;
}

#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Box<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageProvider> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(api: &ApiConfig) -> ImageProviderRegistry {
    let mut registry = ImageProviderRegistry::new();
    registry.register(DryrunProvider);
    registry.register(OpenRouterProvider::new(api));
    registry
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn default_registry_lists_both_transports() {
        let registry = default_provider_registry(&ApiConfig::default());
        assert_eq!(registry.names(), vec!["dryrun", "openrouter"]);
        assert!(registry.get("replicate").is_none());
    }

    #[test]
    fn key_errors_are_found_under_context() {
        let err = anyhow::Error::new(ApiKeyError::Invalid).context("slot 2 failed");
        assert_eq!(api_key_error(&err), Some(ApiKeyError::Invalid));
        assert_eq!(
            ApiKeyError::Missing.to_string(),
            "No API key found. Enter a valid API Key"
        );
        assert_eq!(api_key_error(&anyhow::anyhow!("timeout")), None);
    }

    #[test]
    fn request_exposes_instruction_and_image_count() {
        let request = ProviderRequest {
            model: "m".to_string(),
            content: vec![
                json!({"type": "image_url", "image_url": {"url": "https://a"}}),
                json!({"type": "text", "text": "draw"}),
            ],
            frame: None,
            api_key: None,
            seed: 0,
        };
        assert_eq!(request.instruction(), "draw");
        assert_eq!(request.image_count(), 1);
    }
}
