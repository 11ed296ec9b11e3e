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

use super::error::parse_gemini_error;
use super::request::{build_gemini_body, normalize_model};
use super::response::{GeminiChunkMapper, map_response};
use super::types::GeminiGenerateContentResponse;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini `generateContent` provider.
pub struct GoogleGeminiProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    default_model: Option<String>,
    timeout: Option<Duration>,
}

impl GoogleGeminiProvider {
    /// Provider targeting the public Generative Language endpoint.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: None,
            timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Model such as `gemini-2.0-flash-lite` used when a request names none.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let model_path = normalize_model(model);
        if base.ends_with("/v1beta") {
            format!("{base}/{model_path}:{method}")
        } else {
            format!("{base}/v1beta/{model_path}:{method}")
        }
    }

    pub(crate) fn endpoint(&self, model: &str) -> String {
        self.model_url(model, "generateContent")
    }

    pub(crate) fn stream_endpoint(&self, model: &str) -> String {
        self.model_url(model, "streamGenerateContent?alt=sse")
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            ("x-goog-api-key".to_string(), self.api_key.clone()),
            ("Accept".to_string(), "application/json".to_string()),
        ])
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        request
            .options
            .model
            .clone()
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for Google Gemini".to_string(),
            })
    }
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_gemini_body(&request)?;
        let endpoint = self.endpoint(&model);
        debug!(
            context = short_type_name::<Self>(),
            model = %model,
            messages = request.messages.len(),
            "sending generateContent request"
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
            return Err(parse_gemini_error(status, &text, retry_after));
        }

        let parsed: GeminiGenerateContentResponse =
            serde_json::from_str(&text).map_err(|err| LLMError::Provider {
                provider: self.name(),
                message: format!("failed to parse Gemini response: {err}"),
            })?;
        Ok(map_response(parsed, self.name(), &endpoint))
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_gemini_body(&request)?;
        let endpoint = self.stream_endpoint(&model);
        debug!(
            context = short_type_name::<Self>(),
            model = %model,
            "opening streamGenerateContent"
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
            return Err(parse_gemini_error(response.status, &text, retry_after));
        }
        Ok(chat_stream(
            response.body,
            GeminiChunkMapper,
            self.name(),
            &endpoint,
        ))
    }

    fn name(&self) -> &'static str {
        "google_gemini"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }
}
