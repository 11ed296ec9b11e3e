use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text chat message shared across providers.
///
/// # Examples
///
/// ```
/// # use langchain_llm::types::{Message, Role};
/// let msg = Message::user("What is LangChain?");
/// assert_eq!(msg.role, Role::User);
/// assert_eq!(msg.content, "What is LangChain?");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Sampling and routing options applied to a single request.
///
/// Unset fields fall back to the provider's own defaults. `extra` entries are merged
/// into the top level of the provider request body as-is.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatOptions {
    /// Model identifier; the provider's default model is used when absent.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
    /// Vendor-specific body fields.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl ChatOptions {
    /// Returns `self` with unset fields filled from `defaults`.
    ///
    /// Request values always win; `extra` maps are merged key by key.
    pub fn merged_over(mut self, defaults: &ChatOptions) -> Self {
        if self.model.is_none() {
            self.model = defaults.model.clone();
        }
        if self.temperature.is_none() {
            self.temperature = defaults.temperature;
        }
        if self.top_p.is_none() {
            self.top_p = defaults.top_p;
        }
        if self.max_output_tokens.is_none() {
            self.max_output_tokens = defaults.max_output_tokens;
        }
        if self.stop.is_empty() {
            self.stop = defaults.stop.clone();
        }
        for (key, value) in &defaults.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

/// Provider-agnostic chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Concatenated text of every system message, if any.
    pub(crate) fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Complete reply to a [`ChatRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated assistant text.
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<FinishReason>,
    /// Model that actually served the request, as reported by the provider.
    pub model: Option<String>,
    pub provider: ProviderMetadata,
}

impl ChatResponse {
    /// Wraps the generated text as an assistant [`Message`] for multi-turn use.
    pub fn to_message(&self) -> Message {
        Message::assistant(self.content.clone())
    }
}

/// Incremental piece of a streamed reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    /// Text appended by this chunk; empty for bookkeeping chunks.
    pub delta: String,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<TokenUsage>,
    /// Set on the final chunk of a stream.
    pub is_terminal: bool,
    pub provider: ProviderMetadata,
}

impl ChatChunk {
    pub(crate) fn terminal(provider: ProviderMetadata) -> Self {
        Self {
            delta: String::new(),
            finish_reason: None,
            usage: None,
            is_terminal: true,
            provider,
        }
    }
}

/// Token usage metrics collected from the provider.
///
/// Providers often emit partial usage in streaming mode; consumers can merge
/// the optional values as they arrive.
///
/// # Examples
///
/// ```
/// # use langchain_llm::types::TokenUsage;
/// let usage = TokenUsage::new(1200, 200);
/// assert_eq!(usage.total_tokens, Some(1400));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: Some(prompt_tokens + completion_tokens),
        }
    }

    /// Overlays the fields present in `other`.
    pub fn merge(&mut self, other: &TokenUsage) {
        if other.prompt_tokens.is_some() {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens.is_some() {
            self.completion_tokens = other.completion_tokens;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        }
    }

    /// Reported total, or the sum of prompt and completion counts.
    pub fn total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0)
        })
    }
}

/// Why a chat response stopped generating content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
    Other(String),
}

/// Provider metadata returned with each response.
///
/// Use this structure to correlate logs, surface request IDs to clients, or
/// surface endpoint information during incident triage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Provider identifier such as `openai_chat`.
    pub provider: String,
    /// Upstream request identifier.
    pub request_id: Option<String>,
    /// Endpoint description or URL.
    pub endpoint: Option<String>,
    /// Raw response excerpt for debugging.
    pub raw: Option<Value>,
}

impl ProviderMetadata {
    pub(crate) fn new(provider: &'static str, endpoint: &str) -> Self {
        Self {
            provider: provider.to_string(),
            request_id: None,
            endpoint: Some(endpoint.to_string()),
            raw: None,
        }
    }
}
