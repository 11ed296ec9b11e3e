use crate::error::LLMError;
use crate::stream::{ChunkMapper, MappedEvent};
use crate::types::{ChatChunk, ChatResponse, FinishReason, ProviderMetadata, TokenUsage};

use super::error::stream_error;
use super::types::{AnthropicMessageResponse, AnthropicStreamEvent, AnthropicUsage};

pub(crate) fn map_response(
    resp: AnthropicMessageResponse,
    provider: &'static str,
    endpoint: &str,
) -> ChatResponse {
    let raw = serde_json::to_value(&resp).ok();
    let content = resp
        .content
        .iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_deref())
        .collect::<String>();

    ChatResponse {
        content,
        usage: resp.usage.map(convert_usage),
        finish_reason: resp.stop_reason.as_deref().map(convert_finish_reason),
        model: resp.model,
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.id,
            endpoint: Some(endpoint.to_string()),
            raw,
        },
    }
}

pub(crate) fn convert_usage(usage: AnthropicUsage) -> TokenUsage {
    let total = match (usage.input_tokens, usage.output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    };
    TokenUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: total,
    }
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Folds the Messages event sequence into chunks.
///
/// `message_start` carries the id and input token count, `message_delta` the stop
/// reason and output count, and `message_stop` ends the stream.
#[derive(Default)]
pub(crate) struct AnthropicChunkMapper {
    request_id: Option<String>,
    usage: AnthropicUsage,
}

impl ChunkMapper for AnthropicChunkMapper {
    fn map_data(&mut self, data: &str, meta: &ProviderMetadata) -> Result<MappedEvent, LLMError> {
        let event: AnthropicStreamEvent =
            serde_json::from_str(data).map_err(|err| LLMError::Provider {
                provider: "anthropic_messages",
                message: format!("failed to parse stream event: {err}"),
            })?;

        let meta = ProviderMetadata {
            request_id: self.request_id.clone(),
            ..meta.clone()
        };
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.request_id = message.id;
                if let Some(usage) = message.usage {
                    self.usage = usage;
                }
                Ok(MappedEvent::Skip)
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => match delta.text {
                Some(text) if delta.kind == "text_delta" && !text.is_empty() => {
                    Ok(MappedEvent::Chunk(ChatChunk {
                        delta: text,
                        finish_reason: None,
                        usage: None,
                        is_terminal: false,
                        provider: meta,
                    }))
                }
                _ => Ok(MappedEvent::Skip),
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(output) = usage.and_then(|u| u.output_tokens) {
                    self.usage.output_tokens = Some(output);
                }
                Ok(MappedEvent::Chunk(ChatChunk {
                    delta: String::new(),
                    finish_reason: delta.stop_reason.as_deref().map(convert_finish_reason),
                    usage: Some(convert_usage(self.usage)),
                    is_terminal: false,
                    provider: meta,
                }))
            }
            AnthropicStreamEvent::MessageStop {} => {
                Ok(MappedEvent::Finished(ChatChunk::terminal(meta)))
            }
            AnthropicStreamEvent::Error { error } => Err(stream_error(error)),
            AnthropicStreamEvent::ContentBlockStart {}
            | AnthropicStreamEvent::ContentBlockStop {}
            | AnthropicStreamEvent::Ping {}
            | AnthropicStreamEvent::Unknown => Ok(MappedEvent::Skip),
        }
    }
}
