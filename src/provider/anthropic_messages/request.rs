use serde_json::Value;

use crate::error::LLMError;
use crate::types::{ChatRequest, Role};

use super::types::{AnthropicMessage, AnthropicMessagesBody};

/// `max_tokens` is mandatory on the Messages API; used when the caller sets none.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Builds a Messages body. System messages are lifted into the top-level `system`
/// field since the API only accepts `user` and `assistant` turns.
pub(crate) fn build_anthropic_body(
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<Value, LLMError> {
    let messages: Vec<AnthropicMessage<'_>> = request
        .messages
        .iter()
        .filter(|message| message.role != Role::System)
        .map(|message| AnthropicMessage {
            role: message.role.as_str(),
            content: &message.content,
        })
        .collect();
    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "Anthropic Messages requires at least one user or assistant message"
                .to_string(),
        });
    }

    let options = &request.options;
    let body = AnthropicMessagesBody {
        model,
        max_tokens: options.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: request.system_prompt(),
        temperature: options.temperature,
        top_p: options.top_p,
        stop_sequences: &options.stop,
        stream,
    };

    let mut value = serde_json::to_value(&body).map_err(|err| LLMError::Validation {
        message: format!("failed to serialize request: {err}"),
    })?;
    if let Value::Object(map) = &mut value {
        map.extend(options.extra.clone());
    }
    Ok(value)
}
