use serde_json::Value;

use crate::error::LLMError;
use crate::types::ChatRequest;

use super::types::{OpenAiChatBody, OpenAiMessage, OpenAiStreamOptions};

pub(crate) fn build_openai_body(
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<Value, LLMError> {
    if request.messages.is_empty() {
        return Err(LLMError::Validation {
            message: "at least one message is required".to_string(),
        });
    }

    let options = &request.options;
    let body = OpenAiChatBody {
        model,
        messages: request
            .messages
            .iter()
            .map(|message| OpenAiMessage {
                role: message.role.as_str(),
                content: &message.content,
            })
            .collect(),
        temperature: options.temperature,
        top_p: options.top_p,
        max_completion_tokens: options.max_output_tokens,
        stop: &options.stop,
        stream,
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
    };

    let mut value = serde_json::to_value(&body).map_err(|err| LLMError::Validation {
        message: format!("failed to serialize request: {err}"),
    })?;
    if let Value::Object(map) = &mut value {
        for (key, extra) in &options.extra {
            map.insert(key.clone(), extra.clone());
        }
    }
    Ok(value)
}
