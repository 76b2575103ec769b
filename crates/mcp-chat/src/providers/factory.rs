use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::base::Provider;
use super::errors::ProviderError;
use super::openai::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
use crate::model::{ModelSpec, ProviderFamily};

/// Builds the provider serving a selected model.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, model: &ModelSpec) -> Result<Arc<dyn Provider>, ProviderError>;
}

/// Per-vendor overrides. Unset fields fall back to the vendor defaults, and the
/// api key to the vendor's conventional environment variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub base_path: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatibleFactory {
    endpoints: HashMap<ProviderFamily, ProviderEndpoint>,
}

impl OpenAiCompatibleFactory {
    pub fn new(endpoints: HashMap<ProviderFamily, ProviderEndpoint>) -> Self {
        Self { endpoints }
    }

    fn resolve_config(&self, family: ProviderFamily) -> Result<OpenAiCompatibleConfig, ProviderError> {
        let endpoint = self.endpoints.get(&family).cloned().unwrap_or_default();
        let api_key = endpoint
            .api_key
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(family.api_key_env()).ok())
            .ok_or_else(|| {
                ProviderError::Authentication(format!(
                    "No api key configured for {}, set {}",
                    family,
                    family.api_key_env()
                ))
            })?;

        Ok(OpenAiCompatibleConfig {
            host: endpoint
                .host
                .unwrap_or_else(|| family.default_host().to_string()),
            base_path: endpoint
                .base_path
                .unwrap_or_else(|| family.default_base_path().to_string()),
            api_key,
            timeout_secs: endpoint.timeout_secs,
        })
    }
}

impl ProviderFactory for OpenAiCompatibleFactory {
    fn create(&self, model: &ModelSpec) -> Result<Arc<dyn Provider>, ProviderError> {
        let config = self.resolve_config(model.provider)?;
        Ok(Arc::new(OpenAiCompatibleProvider::from_config(
            config,
            model.clone(),
        )?))
    }
}

/// Hands out the same provider whatever model is selected.
pub struct StaticProviderFactory(Arc<dyn Provider>);

impl StaticProviderFactory {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self(provider)
    }
}

impl ProviderFactory for StaticProviderFactory {
    fn create(&self, _model: &ModelSpec) -> Result<Arc<dyn Provider>, ProviderError> {
        Ok(Arc::clone(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_overrides_defaults() {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            ProviderFamily::Groq,
            ProviderEndpoint {
                host: Some("http://localhost:9000".to_string()),
                api_key: Some("gsk-test".to_string()),
                ..Default::default()
            },
        );
        let factory = OpenAiCompatibleFactory::new(endpoints);
        let config = factory.resolve_config(ProviderFamily::Groq).unwrap();
        assert_eq!(config.host, "http://localhost:9000");
        assert_eq!(config.base_path, "openai/v1/chat/completions");
        assert_eq!(config.api_key, "gsk-test");
    }

    #[test]
    fn test_create_builds_provider_for_model() {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            ProviderFamily::Xai,
            ProviderEndpoint {
                api_key: Some("xai-test".to_string()),
                ..Default::default()
            },
        );
        let factory = OpenAiCompatibleFactory::new(endpoints);
        let spec = ModelSpec::new("grok-3-mini", ProviderFamily::Xai, "grok-3-mini-beta");
        let provider = factory.create(&spec).unwrap();
        assert_eq!(provider.model().id, "grok-3-mini");
    }
}
