use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, post_json_stream_with_headers, post_json_with_headers};
use crate::logging::short_type_name;
use crate::provider::retry::retry_after_from_headers;
use crate::provider::{ChatStream, LLMProvider};
use crate::stream::{chat_stream, collect_body_text};
use crate::types::{ChatRequest, ChatResponse};

use super::error::parse_anthropic_error;
use super::request::build_anthropic_body;
use super::response::{AnthropicChunkMapper, map_response};
use super::types::AnthropicMessageResponse;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";

/// Anthropic Messages provider (Claude 3.x and later).
pub struct AnthropicMessagesProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    version: String,
    beta: Option<String>,
    default_model: Option<String>,
    timeout: Option<Duration>,
}

impl AnthropicMessagesProvider {
    /// Provider with the public endpoint and `anthropic-version: 2023-06-01`.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            version: DEFAULT_VERSION.to_string(),
            beta: None,
            default_model: None,
            timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the `anthropic-beta` header; accepts a comma separated list.
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.beta = Some(beta.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::from([
            ("x-api-key".to_string(), self.api_key.clone()),
            ("anthropic-version".to_string(), self.version.clone()),
        ]);
        if let Some(beta) = &self.beta {
            headers.insert("anthropic-beta".to_string(), beta.clone());
        }
        headers
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        request
            .options
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for Anthropic Messages".to_string(),
            })
    }
}

#[async_trait]
impl LLMProvider for AnthropicMessagesProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_anthropic_body(&request, &model, false)?;
        let endpoint = self.endpoint();
        debug!(
            context = short_type_name::<Self>(),
            model = %model,
            messages = request.messages.len(),
            "sending messages request"
        );

        let response = post_json_with_headers(
            self.transport.as_ref(),
            endpoint.as_str(),
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        let status = response.status;
        let retry_after = retry_after_from_headers(&response.headers);
        let text = response.into_string()?;
        if !(200..300).contains(&status) {
            return Err(parse_anthropic_error(status, &text, retry_after));
        }

        let parsed: AnthropicMessageResponse =
            serde_json::from_str(&text).map_err(|err| LLMError::Provider {
                provider: self.name(),
                message: format!("failed to parse Anthropic response: {err}"),
            })?;
        Ok(map_response(parsed, self.name(), &endpoint))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_anthropic_body(&request, &model, true)?;
        let endpoint = self.endpoint();
        debug!(
            context = short_type_name::<Self>(),
            model = %model,
            "opening messages stream"
        );

        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            endpoint.as_str(),
            self.build_headers(),
            self.timeout,
            &body,
        )
        .await?;
        if !response.is_success() {
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_body_text(response.body, self.name()).await?;
            return Err(parse_anthropic_error(response.status, &text, retry_after));
        }
        Ok(chat_stream(
            response.body,
            AnthropicChunkMapper::default(),
            self.name(),
            &endpoint,
        ))
    }

    fn name(&self) -> &'static str {
        "anthropic_messages"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }
}
