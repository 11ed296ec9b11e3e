use std::time::Duration;

use crate::error::LLMError;
use crate::provider::error::{ErrorDetails, classify_failure, unparsed_failure};

use super::types::{GeminiErrorEnvelope, GeminiErrorPayload};

const PROVIDER: &str = "google_gemini";

/// Parses Google RPC style error bodies.
pub(crate) fn parse_gemini_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    match serde_json::from_str::<GeminiErrorEnvelope>(body) {
        Ok(envelope) => classify(status, envelope.error, retry_after),
        Err(_) => unparsed_failure(PROVIDER, status, body, retry_after),
    }
}

/// Maps an error object delivered inside the event stream.
pub(crate) fn stream_error(error: GeminiErrorPayload) -> LLMError {
    let status = error.code.unwrap_or(500);
    classify(status, error, None)
}

fn classify(status: u16, error: GeminiErrorPayload, retry_after: Option<Duration>) -> LLMError {
    let message = error
        .message
        .unwrap_or_else(|| "unknown error".to_string());
    // Gemini reports a bad key as 400 INVALID_ARGUMENT.
    let status = if message.contains("API key not valid") {
        401
    } else {
        status
    };
    classify_failure(
        PROVIDER,
        status,
        ErrorDetails {
            message,
            code: error.status.as_deref(),
        },
        retry_after,
    )
}
