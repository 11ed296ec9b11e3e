use serde_json::Value;

use crate::error::LLMError;
use crate::types::{ChatRequest, Role};

use super::types::{
    GeminiGenerationConfig, GeminiOwnedTextPart, GeminiRequestBody, GeminiRequestContent,
    GeminiSystemInstruction, GeminiTextPart,
};

/// Builds a `generateContent` body. The model travels in the URL, not the body.
///
/// Assistant turns use Gemini's `model` role and system messages become the
/// `system_instruction`.
pub(crate) fn build_gemini_body(request: &ChatRequest) -> Result<Value, LLMError> {
    let contents: Vec<GeminiRequestContent<'_>> = request
        .messages
        .iter()
        .filter_map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => return None,
            };
            Some(GeminiRequestContent {
                role,
                parts: [GeminiTextPart {
                    text: &message.content,
                }],
            })
        })
        .collect();
    if contents.is_empty() {
        return Err(LLMError::Validation {
            message: "Gemini requires at least one user or model message".to_string(),
        });
    }

    let options = &request.options;
    let generation_config = GeminiGenerationConfig {
        temperature: options.temperature,
        top_p: options.top_p,
        max_output_tokens: options.max_output_tokens,
        stop_sequences: &options.stop,
    };
    let has_config = generation_config.temperature.is_some()
        || generation_config.top_p.is_some()
        || generation_config.max_output_tokens.is_some()
        || !generation_config.stop_sequences.is_empty();

    let body = GeminiRequestBody {
        contents,
        system_instruction: request.system_prompt().map(|text| GeminiSystemInstruction {
            parts: vec![GeminiOwnedTextPart { text }],
        }),
        generation_config: has_config.then_some(generation_config),
    };

    let mut value = serde_json::to_value(&body).map_err(|err| LLMError::Validation {
        message: format!("failed to serialize request: {err}"),
    })?;
    if let Value::Object(map) = &mut value {
        map.extend(options.extra.clone());
    }
    Ok(value)
}

/// Prefixes bare model ids with `models/`, leaving qualified paths untouched.
pub(crate) fn normalize_model(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}
