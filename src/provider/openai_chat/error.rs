use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::provider::error::{ErrorDetails, classify_failure, unparsed_failure};

/// Parses `{"error": {...}}` payloads returned by the Chat Completions API.
pub(crate) fn parse_openai_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<InnerError>,
    }

    #[derive(Deserialize)]
    struct InnerError {
        message: Option<String>,
        r#type: Option<String>,
        code: Option<Value>,
    }

    let Some(error) = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
    else {
        return unparsed_failure("openai_chat", status, body, retry_after);
    };

    let code = match &error.code {
        Some(Value::String(code)) => Some(code.as_str()),
        _ => error.r#type.as_deref(),
    };
    classify_failure(
        "openai_chat",
        status,
        ErrorDetails {
            message: error
                .message
                .unwrap_or_else(|| "unknown error".to_string()),
            code,
        },
        retry_after,
    )
}
