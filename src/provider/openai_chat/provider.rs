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

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::{OpenAiChunkMapper, map_response};
use super::types::OpenAiChatResponse;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI Chat Completions provider.
pub struct OpenAiChatProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    organization: Option<String>,
    project: Option<String>,
    default_model: Option<String>,
    timeout: Option<Duration>,
}

impl OpenAiChatProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            organization: None,
            project: None,
            default_model: None,
            timeout: None,
        }
    }

    /// Points the provider at a compatible gateway; a trailing `/v1` is accepted.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
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
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::from([
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ]);
        if let Some(org) = &self.organization {
            headers.insert("OpenAI-Organization".to_string(), org.clone());
        }
        if let Some(project) = &self.project {
            headers.insert("OpenAI-Project".to_string(), project.clone());
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
                message: "model is required for OpenAI Chat".to_string(),
            })
    }
}

#[async_trait]
impl LLMProvider for OpenAiChatProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_openai_body(&request, &model, false)?;
        let endpoint = self.endpoint();
        debug!(
            context = short_type_name::<Self>(),
            model = %model,
            messages = request.messages.len(),
            "sending chat completion"
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
            return Err(parse_openai_error(status, &text, retry_after));
        }

        let parsed: OpenAiChatResponse =
            serde_json::from_str(&text).map_err(|err| LLMError::Provider {
                provider: self.name(),
                message: format!("failed to parse OpenAI response: {err}"),
            })?;
        map_response(parsed, self.name(), &endpoint)
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let body = build_openai_body(&request, &model, true)?;
        let endpoint = self.endpoint();
        debug!(
            context = short_type_name::<Self>(),
            model = %model,
            "opening chat completion stream"
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
            return Err(parse_openai_error(response.status, &text, retry_after));
        }
        Ok(chat_stream(
            response.body,
            OpenAiChunkMapper,
            self.name(),
            &endpoint,
        ))
    }

    fn name(&self) -> &'static str {
        "openai_chat"
    }

    fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }
}
