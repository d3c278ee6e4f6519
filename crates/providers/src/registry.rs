//! Process-wide provider registry.
//!
//! Built once at startup from [`ProviderConfig`] and shared behind an `Arc`.
//! Tests build their own registry with [`ProviderRegistry::register`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::gemini::{self, GeminiProvider};
use crate::kie::{self, KieProvider};
use crate::provider::AiProvider;
use crate::replicate::{self, ReplicateProvider};

/// Upper bound for a single provider HTTP call. Gemini answers
/// synchronously and can take close to a minute for 4K output.
pub const PROVIDER_HTTP_TIMEOUT: Duration = Duration::from_secs(110);

/// Provider credentials loaded from environment variables.
///
/// A provider is only registered when its credential is present.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub replicate_api_token: Option<String>,
    pub replicate_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub kie_api_key: Option<String>,
    pub kie_base_url: String,
}

impl ProviderConfig {
    /// Load provider configuration from environment variables.
    ///
    /// | Env Var               | Default                                             |
    /// |-----------------------|-----------------------------------------------------|
    /// | `REPLICATE_API_TOKEN` | unset (provider disabled)                           |
    /// | `REPLICATE_BASE_URL`  | `https://api.replicate.com`                         |
    /// | `GEMINI_API_KEY`      | unset (provider disabled)                           |
    /// | `GEMINI_BASE_URL`     | `https://generativelanguage.googleapis.com/v1beta`  |
    /// | `KIE_API_KEY`         | unset (provider disabled)                           |
    /// | `KIE_BASE_URL`        | `https://api.kie.ai`                                |
    pub fn from_env() -> Self {
        Self {
            replicate_api_token: non_empty_var("REPLICATE_API_TOKEN"),
            replicate_base_url: std::env::var("REPLICATE_BASE_URL")
                .unwrap_or_else(|_| replicate::DEFAULT_BASE_URL.into()),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| gemini::DEFAULT_BASE_URL.into()),
            kie_api_key: non_empty_var("KIE_API_KEY"),
            kie_base_url: std::env::var("KIE_BASE_URL")
                .unwrap_or_else(|_| kie::DEFAULT_BASE_URL.into()),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Name-keyed set of configured providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn AiProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct every provider whose credential is configured. All
    /// providers share one pooled HTTP client.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_HTTP_TIMEOUT)
            .build()?;

        let mut registry = Self::new();
        if let Some(token) = &config.replicate_api_token {
            registry.register(Arc::new(ReplicateProvider::new(
                client.clone(),
                token.clone(),
                config.replicate_base_url.clone(),
            )));
        }
        if let Some(key) = &config.gemini_api_key {
            registry.register(Arc::new(GeminiProvider::new(
                client.clone(),
                key.clone(),
                config.gemini_base_url.clone(),
            )));
        }
        if let Some(key) = &config.kie_api_key {
            registry.register(Arc::new(KieProvider::new(
                client.clone(),
                key.clone(),
                config.kie_base_url.clone(),
            )));
        }

        tracing::info!(providers = ?registry.names(), "Provider registry initialized");
        Ok(registry)
    }

    /// Add a provider, replacing any existing one with the same name.
    pub fn register(&mut self, provider: Arc<dyn AiProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Builder form of [`ProviderRegistry::register`].
    pub fn with_provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AiProvider>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configured_providers_are_registered() {
        let config = ProviderConfig {
            replicate_api_token: Some("r8_token".into()),
            replicate_base_url: replicate::DEFAULT_BASE_URL.into(),
            gemini_api_key: None,
            gemini_base_url: gemini::DEFAULT_BASE_URL.into(),
            kie_api_key: None,
            kie_base_url: kie::DEFAULT_BASE_URL.into(),
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();

        assert_eq!(registry.names(), vec!["replicate"]);
        assert!(registry.get("replicate").is_some());
        assert!(registry.get("gemini").is_none());
        assert!(registry.get("kie").is_none());
    }

    #[test]
    fn kie_is_registered_when_keyed() {
        let config = ProviderConfig {
            gemini_api_key: Some("AIza-key".into()),
            gemini_base_url: gemini::DEFAULT_BASE_URL.into(),
            kie_api_key: Some("kie-key".into()),
            kie_base_url: kie::DEFAULT_BASE_URL.into(),
            ..ProviderConfig::default()
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();

        assert_eq!(registry.names(), vec!["gemini", "kie"]);
        let kie = registry.get("kie").unwrap();
        assert!(kie.capability().supports_query());
    }

    #[test]
    fn empty_config_yields_empty_registry() {
        let registry = ProviderRegistry::from_config(&ProviderConfig::default()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn register_replaces_same_name() {
        let client = reqwest::Client::new();
        let registry = ProviderRegistry::new()
            .with_provider(Arc::new(GeminiProvider::new(
                client.clone(),
                "a".into(),
                "http://one".into(),
            )))
            .with_provider(Arc::new(GeminiProvider::new(
                client,
                "b".into(),
                "http://two".into(),
            )));
        assert_eq!(registry.names(), vec!["gemini"]);
    }
}
