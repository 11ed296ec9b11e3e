use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::client::LLMClient;
use crate::error::{ConfigError, LLMError};
use crate::http::DynHttpTransport;
use crate::model::ChatModel;
use crate::provider::DynProvider;
use crate::provider::anthropic_messages::AnthropicMessagesProvider;
use crate::provider::google_gemini::GoogleGeminiProvider;
use crate::provider::openai_chat::OpenAiChatProvider;
use crate::types::ChatOptions;
use crate::usage::UsageTracker;

use super::{ConfigProvider, Provider, resolve_model_name};

/// Declarative description of one callable backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Name the model is registered under, e.g. `openai` or `fast-claude`.
    pub handle: String,
    pub provider: Provider,
    pub api_key: String,
    pub default_model: Option<String>,
    pub base_url: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Options applied to every request sent through this handle.
    #[serde(default)]
    pub options: ChatOptions,
    /// Provider specific settings: `organization` and `project` for OpenAI,
    /// `version` and `beta` for Anthropic.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl ModelConfig {
    pub fn new(handle: impl Into<String>, provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            provider,
            api_key: api_key.into(),
            default_model: None,
            base_url: None,
            timeout_secs: None,
            options: ChatOptions::default(),
            extra: HashMap::new(),
        }
    }

    /// Config for `provider` from `config`, registered under the provider identity.
    ///
    /// The model is the configured one or [`Provider::default_model`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingApiKey`] when the provider has no key.
    pub fn from_env(provider: Provider, config: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let api_key = config
            .get_key(provider.as_str(), true)?
            .unwrap_or_default();
        Ok(Self::new(provider.as_str(), provider, api_key)
            .with_default_model(resolve_model_name(config, provider)))
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    fn extra_str(&self, key: &str) -> Option<String> {
        match self.extra.get(key) {
            Some(Value::String(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Builds an [`LLMClient`] with one handle per config.
///
/// All handles share one [`UsageTracker`] priced with the default table.
pub fn build_client_from_configs(
    configs: &[ModelConfig],
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let mut builder = LLMClient::builder().with_usage_tracker(Arc::new(UsageTracker::new()));

    for config in configs {
        let provider = build_provider_from_config(config, transport.clone())?;
        let model = ChatModel::new(provider).with_options(config.options.clone());
        debug!(
            handle = %config.handle,
            provider = %config.provider,
            model = ?config.default_model,
            "registered model handle"
        );
        builder = builder.register_model(config.handle.clone(), model);
    }

    Ok(builder.build())
}

/// Builds an [`LLMClient`] with a handle for every provider that has a key in
/// `config`.
///
/// Handles are the provider identities (`openai`, `anthropic`, `gemini`).
pub fn build_client_from_env(
    config: &dyn ConfigProvider,
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let mut configs = Vec::new();
    for (provider, key) in config.get_all_keys() {
        if key.is_none() {
            debug!(provider = %provider, "skipping provider without API key");
            continue;
        }
        configs.push(ModelConfig::from_env(provider, config)?);
    }
    info!(
        providers = configs.len(),
        "building client from environment"
    );
    build_client_from_configs(&configs, transport)
}

fn build_provider_from_config(
    config: &ModelConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    if config.api_key.is_empty() {
        return Err(LLMError::Auth {
            message: format!(
                "handle {} requires an API key for provider {}",
                config.handle, config.provider
            ),
        });
    }

    let provider: DynProvider = match config.provider {
        Provider::OpenAi => {
            let mut provider = OpenAiChatProvider::new(transport, config.api_key.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(timeout) = config.timeout() {
                provider = provider.with_timeout(timeout);
            }
            if let Some(org) = config.extra_str("organization") {
                provider = provider.with_organization(org);
            }
            if let Some(project) = config.extra_str("project") {
                provider = provider.with_project(project);
            }
            Arc::new(provider)
        }
        Provider::Anthropic => {
            let mut provider = AnthropicMessagesProvider::new(transport, config.api_key.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(timeout) = config.timeout() {
                provider = provider.with_timeout(timeout);
            }
            if let Some(version) = config.extra_str("version") {
                provider = provider.with_version(version);
            }
            if let Some(beta) = config.extra_str("beta") {
                provider = provider.with_beta(beta);
            }
            Arc::new(provider)
        }
        Provider::Gemini => {
            let mut provider = GoogleGeminiProvider::new(transport, config.api_key.clone());
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if let Some(timeout) = config.timeout() {
                provider = provider.with_timeout(timeout);
            }
            Arc::new(provider)
        }
    };

    Ok(provider)
}
