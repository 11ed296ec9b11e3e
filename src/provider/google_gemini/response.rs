use serde_json::Value;

use crate::error::LLMError;
use crate::stream::{ChunkMapper, MappedEvent};
use crate::types::{ChatChunk, ChatResponse, FinishReason, ProviderMetadata, TokenUsage};

use super::error::stream_error;
use super::types::{GeminiErrorEnvelope, GeminiGenerateContentResponse, GeminiUsageMetadata};

pub(crate) fn map_response(
    resp: GeminiGenerateContentResponse,
    provider: &'static str,
    endpoint: &str,
) -> ChatResponse {
    let raw = serde_json::to_value(&resp).ok();
    let (content, finish_reason) = first_candidate(&resp);
    ChatResponse {
        content,
        usage: resp.usage_metadata.map(convert_usage),
        finish_reason,
        model: resp.model_version,
        provider: ProviderMetadata {
            provider: provider.to_string(),
            request_id: resp.response_id,
            endpoint: Some(endpoint.to_string()),
            raw,
        },
    }
}

/// Answer text and finish reason of the first candidate.
///
/// A prompt blocked before generation has no candidates; that surfaces as an empty
/// reply finished by the content filter.
fn first_candidate(resp: &GeminiGenerateContentResponse) -> (String, Option<FinishReason>) {
    let Some(candidate) = resp
        .candidates
        .iter()
        .min_by_key(|candidate| candidate.index.unwrap_or(0))
    else {
        let blocked = resp
            .prompt_feedback
            .as_ref()
            .is_some_and(|feedback| feedback.block_reason.is_some());
        return (String::new(), blocked.then_some(FinishReason::ContentFilter));
    };

    let text = candidate
        .content
        .iter()
        .flat_map(|content| content.parts.iter())
        .filter(|part| part.thought != Some(true))
        .filter_map(|part| part.text.as_deref())
        .collect::<String>();
    (
        text,
        candidate
            .finish_reason
            .as_deref()
            .map(convert_finish_reason),
    )
}

pub(crate) fn convert_usage(usage: GeminiUsageMetadata) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
    }
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        "MALFORMED_FUNCTION_CALL" | "OTHER" => FinishReason::Error,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Maps `streamGenerateContent?alt=sse` payloads. Gemini sends no terminator, so the
/// end of the body closes the stream.
pub(crate) struct GeminiChunkMapper;

impl ChunkMapper for GeminiChunkMapper {
    fn map_data(&mut self, data: &str, meta: &ProviderMetadata) -> Result<MappedEvent, LLMError> {
        let value: Value = serde_json::from_str(data).map_err(|err| LLMError::Provider {
            provider: "google_gemini",
            message: format!("failed to parse stream chunk: {err}"),
        })?;
        if value.get("error").is_some() {
            let envelope: GeminiErrorEnvelope =
                serde_json::from_value(value).map_err(|err| LLMError::Provider {
                    provider: "google_gemini",
                    message: format!("failed to parse stream error: {err}"),
                })?;
            return Err(stream_error(envelope.error));
        }

        let chunk: GeminiGenerateContentResponse =
            serde_json::from_value(value).map_err(|err| LLMError::Provider {
                provider: "google_gemini",
                message: format!("failed to parse stream chunk: {err}"),
            })?;
        let (delta, finish_reason) = first_candidate(&chunk);
        let usage = chunk.usage_metadata.map(convert_usage);
        if delta.is_empty() && finish_reason.is_none() && usage.is_none() {
            return Ok(MappedEvent::Skip);
        }

        Ok(MappedEvent::Chunk(ChatChunk {
            delta,
            finish_reason,
            usage,
            is_terminal: false,
            provider: ProviderMetadata {
                request_id: chunk.response_id.clone(),
                raw: serde_json::to_value(&chunk).ok(),
                ..meta.clone()
            },
        }))
    }

    fn end_of_body(&mut self, meta: &ProviderMetadata) -> Result<Option<ChatChunk>, LLMError> {
        Ok(Some(ChatChunk::terminal(meta.clone())))
    }
}
