use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::LLMError;
use crate::types::{ChatChunk, ChatRequest, ChatResponse};

pub mod anthropic_messages;
pub mod google_gemini;
pub mod openai_chat;

mod error;
mod retry;

pub use anthropic_messages::AnthropicMessagesProvider;
pub use google_gemini::GoogleGeminiProvider;
pub use openai_chat::OpenAiChatProvider;

/// Stream of incremental chunks produced by [`LLMProvider::stream_chat`].
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, LLMError>> + Send>>;

/// Wire-protocol adapter for one vendor API.
///
/// Implementations translate a [`ChatRequest`] into the vendor's JSON body, send it
/// through an [`crate::http::HttpTransport`] and map the reply or the error payload
/// back into crate types.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Sends the request and waits for the complete reply.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;

    /// Sends the request and yields the reply as it is generated.
    ///
    /// Errors returned before the stream starts come from the HTTP status; errors
    /// inside the stream come from in-band error events or a truncated body.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError>;

    /// Stable identifier such as `openai_chat`.
    fn name(&self) -> &'static str;

    /// Model used when a request does not name one.
    fn default_model(&self) -> Option<&str> {
        None
    }
}

/// Shared provider handle.
pub type DynProvider = Arc<dyn LLMProvider>;
