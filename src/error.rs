use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures raised while resolving provider configuration.
///
/// These represent setup problems the caller must fix before proceeding, so they
/// are never retried or wrapped with extra context.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The provider identity is not one of `openai`, `anthropic` or `gemini`.
    #[error("Unknown provider: {provider}. Supported providers: {supported}")]
    UnknownProvider {
        /// Lower-cased identity supplied by the caller.
        provider: String,
        /// Comma separated, sorted list of accepted identities.
        supported: String,
    },
    /// A required API key is unset or empty.
    #[error(
        "API key not found for provider '{provider}'. Please set {env_var} in your .env file or environment variables. See .env.example for template."
    )]
    MissingApiKey {
        provider: &'static str,
        /// Exact environment variable the operator has to set.
        env_var: String,
    },
    /// An explicitly requested `.env` file could not be read or parsed.
    #[error("failed to load environment file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Failures raised while installing the logging pipeline.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured level is not a recognised severity name.
    #[error("invalid log level '{0}': expected one of TRACE, DEBUG, INFO, WARNING, ERROR, CRITICAL")]
    InvalidLevel(String),
    /// The log file or one of its parent directories could not be created.
    #[error("failed to open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Another global subscriber was installed before `setup_logging` ran.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
    /// The installed pipeline could not be swapped.
    #[error("failed to reconfigure logging: {0}")]
    Reload(String),
}

/// Aggregates every failure mode exposed by the chat client.
///
/// Callers can match on the specific variant to decide whether to retry, fall back
/// to another provider, or surface an actionable message to the user.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Invalid or missing credentials reported by the provider.
    #[error("auth failure: {message}")]
    Auth { message: String },
    /// The provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Raw message returned by the upstream provider.
        message: String,
        /// Wait duration suggested by the provider before retrying.
        retry_after: Option<Duration>,
    },
    /// The prompt or expected completion exceeds the model's token budget.
    #[error("token limit exceeded: {message}")]
    TokenLimitExceeded { message: String },
    /// The request payload was rejected before or by the provider.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// The requested model could not be resolved.
    #[error("model not found: {message}")]
    ModelNotFound {
        /// Model identifier extracted from the error payload when available.
        model: Option<String>,
        message: String,
    },
    /// A streaming channel closed before delivering its terminal event.
    #[error("stream closed unexpectedly: {message}")]
    StreamClosed { message: String },
    /// Provider-defined errors that cannot be normalized.
    #[error("provider {provider} error: {message}")]
    Provider {
        /// Name of the provider, such as `openai_chat`.
        provider: &'static str,
        message: String,
    },
    /// Configuration problems surfaced while building a client.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use langchain_llm::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use langchain_llm::error::LLMError;
    ///
    /// let err = LLMError::provider("openai_chat", "bad JSON payload");
    /// assert!(matches!(err, LLMError::Provider { provider: "openai_chat", .. }));
    /// ```
    pub fn provider<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Returns `true` for failures that may succeed when the request is re-sent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::RateLimit { .. } | Self::StreamClosed { .. }
        )
    }

    /// Suggested wait before retrying, when the provider sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Returns `true` when an error code or message suggests a context window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 6] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// Attempts to extract a quoted model identifier from an error message.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    ['`', '"', '\'']
        .into_iter()
        .filter_map(|delimiter| between_delimiters(message, delimiter))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn between_delimiters(message: &str, delimiter: char) -> Option<&str> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let rest = &message[start..];
    let end = rest.find(delimiter)?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_message_names_variable() {
        let err = ConfigError::MissingApiKey {
            provider: "openai",
            env_var: "EADLANGCHAIN_AI_OPENAI_API_KEY".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("API key not found"));
        assert!(message.contains("EADLANGCHAIN_AI_OPENAI_API_KEY"));
    }

    #[test]
    fn config_errors_pass_through_llm_error_unchanged() {
        let config = ConfigError::UnknownProvider {
            provider: "mistral".to_string(),
            supported: "anthropic, gemini, openai".to_string(),
        };
        let expected = config.to_string();
        let err = LLMError::from(config);
        assert_eq!(err.to_string(), expected);
        assert!(!err.is_retryable());
    }

    #[test]
    fn retry_classification() {
        let err = LLMError::RateLimit {
            message: "slow down".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(LLMError::transport("reset").is_retryable());
        assert!(
            !LLMError::Auth {
                message: "bad key".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn token_limit_hints_match_codes_and_messages() {
        assert!(looks_like_token_limit_error(
            Some("context_length_exceeded"),
            "whatever"
        ));
        assert!(looks_like_token_limit_error(
            None,
            "This model's maximum context length is 8192 tokens; prompt is too long"
        ));
        assert!(!looks_like_token_limit_error(Some("invalid_api_key"), "bad key"));
    }

    #[test]
    fn model_identifier_is_taken_from_first_quoted_span() {
        assert_eq!(
            extract_model_identifier("The model `gpt-bogus` does not exist").as_deref(),
            Some("gpt-bogus")
        );
        assert_eq!(
            extract_model_identifier("models/\"gemini-x\" is not found").as_deref(),
            Some("gemini-x")
        );
        assert_eq!(extract_model_identifier("no quotes here"), None);
    }
}
