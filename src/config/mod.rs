//! Environment-driven provider configuration.
//!
//! Every lookup reads the process environment at call time, so variables set after
//! start-up (for example by [`load_env_config`]) are observed immediately.
//!
//! ```
//! use langchain_llm::config::{ConfigProvider, EnvConfigProvider, Provider};
//!
//! let config = EnvConfigProvider::with_prefix("DOCTEST_CONFIG");
//! assert_eq!(config.api_key_var(Provider::Gemini), "DOCTEST_CONFIG_AI_GEMINI_API_KEY");
//! assert!(config.get_key("gemini", false).unwrap().is_none());
//! assert!(config.get_key("mistral", false).is_err());
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

mod env_file;
mod model;

pub use env_file::{load_env_config, load_env_config_from};
pub use model::{ModelConfig, build_client_from_configs, build_client_from_env};

/// Prefix shared by every variable this crate reads.
pub const DEFAULT_ENV_PREFIX: &str = "EADLANGCHAIN";

/// The fixed set of hosted LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Provider {
    /// All providers in declaration order.
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Gemini];

    /// Lower-case identity used as the lookup key.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    /// Model used by the bundled client when none is configured.
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-5-nano",
            Provider::Anthropic => "claude-3-haiku-20240307",
            Provider::Gemini => "gemini-2.0-flash-lite",
        }
    }

    fn env_segment(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI",
            Provider::Anthropic => "ANTHROPIC",
            Provider::Gemini => "GEMINI",
        }
    }

    fn supported_list() -> String {
        let mut names: Vec<&str> = Self::ALL.iter().map(|p| p.as_str()).collect();
        names.sort_unstable();
        names.join(", ")
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    /// Parses a provider identity case-insensitively.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.to_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownProvider {
                provider: normalized,
                supported: Provider::supported_list(),
            })
    }
}

/// Source of provider secrets and model names.
///
/// Implementations other than [`EnvConfigProvider`] (files, vaults, test doubles)
/// plug into [`ModelConfig::from_env`] and [`build_client_from_env`].
pub trait ConfigProvider: Send + Sync {
    /// Returns the API key for `provider`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownProvider`] for identities outside the fixed set, whatever
    /// the value of `required`; [`ConfigError::MissingApiKey`] when `required` is set
    /// and the key is absent or empty.
    fn get_key(&self, provider: &str, required: bool) -> Result<Option<String>, ConfigError>;

    /// Returns every provider mapped to its key, configured or not.
    fn get_all_keys(&self) -> BTreeMap<Provider, Option<String>>;

    /// Fails unless `provider` has a non-empty API key.
    fn validate(&self, provider: &str) -> Result<(), ConfigError> {
        self.get_key(provider, true).map(|_| ())
    }

    /// Returns the configured default model, or `None` when unset or when the
    /// identity is not recognised.
    fn get_model_name(&self, provider: &str) -> Option<String>;
}

/// [`ConfigProvider`] reading `<PREFIX>_AI_<PROVIDER>_API_KEY` and
/// `<PREFIX>_AI_<PROVIDER>_MODEL` from the process environment.
#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: Cow<'static, str>,
}

impl EnvConfigProvider {
    /// Provider using [`DEFAULT_ENV_PREFIX`].
    pub const fn new() -> Self {
        Self {
            prefix: Cow::Borrowed(DEFAULT_ENV_PREFIX),
        }
    }

    /// Provider reading variables under a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Cow::Owned(prefix.into()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name of the variable holding the API key for `provider`.
    pub fn api_key_var(&self, provider: Provider) -> String {
        format!("{}_AI_{}_API_KEY", self.prefix, provider.env_segment())
    }

    /// Name of the variable holding the default model for `provider`.
    pub fn model_var(&self, provider: Provider) -> String {
        format!("{}_AI_{}_MODEL", self.prefix, provider.env_segment())
    }

    fn read(name: &str) -> Option<String> {
        env::var(name).ok().filter(|value| !value.is_empty())
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_key(&self, provider: &str, required: bool) -> Result<Option<String>, ConfigError> {
        let provider: Provider = provider.parse()?;
        let env_var = self.api_key_var(provider);
        match Self::read(&env_var) {
            Some(key) => Ok(Some(key)),
            None if required => Err(ConfigError::MissingApiKey {
                provider: provider.as_str(),
                env_var,
            }),
            None => Ok(None),
        }
    }

    fn get_all_keys(&self) -> BTreeMap<Provider, Option<String>> {
        Provider::ALL
            .into_iter()
            .map(|provider| (provider, Self::read(&self.api_key_var(provider))))
            .collect()
    }

    fn get_model_name(&self, provider: &str) -> Option<String> {
        let provider: Provider = provider.parse().ok()?;
        Self::read(&self.model_var(provider))
    }
}

static DEFAULT_CONFIG: EnvConfigProvider = EnvConfigProvider::new();

/// [`ConfigProvider::get_key`] on the default [`EnvConfigProvider`].
pub fn get_api_key(provider: &str, required: bool) -> Result<Option<String>, ConfigError> {
    DEFAULT_CONFIG.get_key(provider, required)
}

/// [`ConfigProvider::get_all_keys`] on the default [`EnvConfigProvider`].
pub fn get_all_api_keys() -> BTreeMap<Provider, Option<String>> {
    DEFAULT_CONFIG.get_all_keys()
}

/// [`ConfigProvider::validate`] on the default [`EnvConfigProvider`].
pub fn validate_provider(provider: &str) -> Result<(), ConfigError> {
    DEFAULT_CONFIG.validate(provider)
}

/// [`ConfigProvider::get_model_name`] on the default [`EnvConfigProvider`].
pub fn get_model_name(provider: &str) -> Option<String> {
    DEFAULT_CONFIG.get_model_name(provider)
}

/// Configured model for `provider`, falling back to [`Provider::default_model`].
pub fn resolve_model_name(config: &dyn ConfigProvider, provider: Provider) -> String {
    config
        .get_model_name(provider.as_str())
        .unwrap_or_else(|| provider.default_model().to_string())
}
