use std::time::Duration;

use crate::error::{LLMError, extract_model_identifier, looks_like_token_limit_error};

/// Details pulled out of a vendor error payload.
pub(crate) struct ErrorDetails<'a> {
    pub(crate) message: String,
    /// Vendor error code or status string, e.g. `rate_limit_error` or `NOT_FOUND`.
    pub(crate) code: Option<&'a str>,
}

/// Maps an HTTP failure onto the shared [`LLMError`] taxonomy.
///
/// Token-limit hints win over the status code, then model-not-found, then the
/// status itself. `code` is appended to the message when present.
pub(crate) fn classify_failure(
    provider: &'static str,
    status: u16,
    details: ErrorDetails<'_>,
    retry_after: Option<Duration>,
) -> LLMError {
    let ErrorDetails { mut message, code } = details;
    if let Some(code) = code.filter(|c| !c.is_empty()) {
        message = format!("{message} ({code})");
    }

    if looks_like_token_limit_error(code, &message) {
        return LLMError::TokenLimitExceeded { message };
    }

    let not_found_code = code.is_some_and(|c| {
        c.eq_ignore_ascii_case("not_found") || c.eq_ignore_ascii_case("not_found_error")
    });
    if status == 404 || not_found_code {
        return LLMError::ModelNotFound {
            model: extract_model_identifier(&message),
            message,
        };
    }

    match status {
        401 | 403 => LLMError::Auth { message },
        // 529 is Anthropic's "overloaded" status.
        429 | 529 => LLMError::RateLimit {
            message,
            retry_after,
        },
        400 | 413 | 422 => LLMError::Validation { message },
        _ => LLMError::Provider { provider, message },
    }
}

/// Error for a payload that did not match the vendor's documented error shape.
pub(crate) fn unparsed_failure(
    provider: &'static str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    match status {
        401 | 403 => LLMError::Auth {
            message: format!("status {status}: {body}"),
        },
        429 => LLMError::RateLimit {
            message: format!("status {status}: {body}"),
            retry_after,
        },
        _ => LLMError::Provider {
            provider,
            message: format!("status {status}: {body}"),
        },
    }
}
