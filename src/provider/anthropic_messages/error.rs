use std::time::Duration;

use serde::Deserialize;

use crate::error::LLMError;
use crate::provider::error::{ErrorDetails, classify_failure, unparsed_failure};

use super::types::AnthropicErrorPayload;

const PROVIDER: &str = "anthropic_messages";

/// Parses `{"type": "error", "error": {...}}` bodies returned with a non-2xx status.
pub(crate) fn parse_anthropic_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<AnthropicErrorPayload>,
    }

    match serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
    {
        Some(error) => classify(status, error, retry_after),
        None => unparsed_failure(PROVIDER, status, body, retry_after),
    }
}

/// Maps an `error` event received mid-stream, where no HTTP status is available.
pub(crate) fn stream_error(error: AnthropicErrorPayload) -> LLMError {
    let status = match error.r#type.as_deref() {
        Some("invalid_request_error") => 400,
        Some("authentication_error") => 401,
        Some("permission_error") => 403,
        Some("not_found_error") => 404,
        Some("request_too_large") => 413,
        Some("rate_limit_error") => 429,
        Some("overloaded_error") => 529,
        _ => 500,
    };
    classify(status, error, None)
}

fn classify(status: u16, error: AnthropicErrorPayload, retry_after: Option<Duration>) -> LLMError {
    classify_failure(
        PROVIDER,
        status,
        ErrorDetails {
            message: error
                .message
                .unwrap_or_else(|| "unknown error".to_string()),
            code: error.r#type.as_deref(),
        },
        retry_after,
    )
}
