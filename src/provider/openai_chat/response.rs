use crate::error::LLMError;
use crate::stream::{ChunkMapper, MappedEvent};
use crate::types::{ChatChunk, ChatResponse, FinishReason, ProviderMetadata, TokenUsage};

use super::types::{OpenAiChatResponse, OpenAiStreamChunk, OpenAiUsage};

pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    provider: &'static str,
    endpoint: &str,
) -> Result<ChatResponse, LLMError> {
    let raw = serde_json::to_value(&resp).ok();
    let choice = resp
        .choices
        .iter()
        .min_by_key(|choice| choice.index)
        .ok_or_else(|| LLMError::provider(provider, "response contained no choices"))?;

    let content = choice
        .message
        .as_ref()
        .and_then(|message| message.content.clone().or_else(|| message.refusal.clone()))
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        usage: resp.usage.map(convert_usage),
        finish_reason: choice.finish_reason.as_deref().map(convert_finish_reason),
        model: resp.model.clone(),
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.id.clone(),
            endpoint: Some(endpoint.to_string()),
            raw,
        },
    })
}

pub(crate) fn convert_usage(usage: OpenAiUsage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Maps `chat.completion.chunk` payloads; `[DONE]` ends the stream.
pub(crate) struct OpenAiChunkMapper;

impl ChunkMapper for OpenAiChunkMapper {
    fn map_data(&mut self, data: &str, meta: &ProviderMetadata) -> Result<MappedEvent, LLMError> {
        let chunk: OpenAiStreamChunk =
            serde_json::from_str(data).map_err(|err| LLMError::Provider {
                provider: "openai_chat",
                message: format!("failed to parse stream chunk: {err}"),
            })?;

        let mut delta = String::new();
        let mut finish_reason = None;
        for choice in chunk.choices.iter().filter(|choice| choice.index == 0) {
            if let Some(text) = choice.delta.as_ref().and_then(|d| d.content.as_deref()) {
                delta.push_str(text);
            }
            if let Some(reason) = choice.finish_reason.as_deref() {
                finish_reason = Some(convert_finish_reason(reason));
            }
        }
        let usage = chunk.usage.map(convert_usage);

        if delta.is_empty() && finish_reason.is_none() && usage.is_none() {
            return Ok(MappedEvent::Skip);
        }

        Ok(MappedEvent::Chunk(ChatChunk {
            delta,
            finish_reason,
            usage,
            is_terminal: false,
            provider: ProviderMetadata {
                request_id: chunk.id.clone(),
                raw: serde_json::to_value(&chunk).ok(),
                ..meta.clone()
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_maps_first_choice_usage_and_id() {
        let resp: OpenAiChatResponse = serde_json::from_str(
            r#"{
                "id": "chatcmpl-123",
                "object": "chat.completion",
                "model": "gpt-5-nano-2025-08-07",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "LangChain is a framework."},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18}
            }"#,
        )
        .unwrap();

        let mapped = map_response(resp, "openai_chat", "https://api.openai.com/v1/chat/completions")
            .unwrap();
        assert_eq!(mapped.content, "LangChain is a framework.");
        assert_eq!(mapped.finish_reason, Some(FinishReason::Stop));
        assert_eq!(mapped.usage, Some(TokenUsage::new(12, 6)));
        assert_eq!(mapped.model.as_deref(), Some("gpt-5-nano-2025-08-07"));
        assert_eq!(mapped.provider.request_id.as_deref(), Some("chatcmpl-123"));
    }

    #[test]
    fn response_without_choices_is_a_provider_error() {
        let resp: OpenAiChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let err = map_response(resp, "openai_chat", "x").unwrap_err();
        assert!(matches!(err, LLMError::Provider { .. }));
    }

    #[test]
    fn chunk_mapper_skips_role_only_deltas() {
        let meta = ProviderMetadata::new("openai_chat", "x");
        let mut mapper = OpenAiChunkMapper;
        let first = mapper
            .map_data(
                r#"{"id":"c1","choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
                &meta,
            )
            .unwrap();
        assert!(matches!(first, MappedEvent::Skip));

        let second = mapper
            .map_data(
                r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
                &meta,
            )
            .unwrap();
        match second {
            MappedEvent::Chunk(chunk) => {
                assert_eq!(chunk.delta, "Hel");
                assert_eq!(chunk.provider.request_id.as_deref(), Some("c1"));
            }
            _ => panic!("expected a chunk"),
        }

        let usage = mapper
            .map_data(
                r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
                &meta,
            )
            .unwrap();
        match usage {
            MappedEvent::Chunk(chunk) => assert_eq!(chunk.usage, Some(TokenUsage::new(3, 2))),
            _ => panic!("expected a usage chunk"),
        }
    }
}
