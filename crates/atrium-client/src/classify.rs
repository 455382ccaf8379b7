//! Mapping of HTTP outcomes onto the [`ApiError`] taxonomy
//!
//! Pure functions: no retries or session side effects happen here. The
//! response pipeline decides what to retry before anything reaches the
//! classifier.

use atrium_core::envelope::ErrorEnvelope;
use reqwest::StatusCode;

use crate::error::ApiError;

/// Classify a non-success response.
///
/// `auth_endpoint` marks login/register/password endpoints, whose 401 is a
/// credential rejection rather than an expired session.
pub fn classify_status(
    status: StatusCode,
    body: &[u8],
    retry_after_secs: Option<u64>,
    auth_endpoint: bool,
) -> ApiError {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).unwrap_or_default();
    let message = envelope
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| default_message(status));

    match status.as_u16() {
        400 => ApiError::Validation {
            message,
            issues: envelope.errors,
        },
        401 if auth_endpoint => ApiError::CredentialsRejected { message },
        401 => ApiError::AuthExpired,
        403 => ApiError::PermissionDenied { message },
        404 => ApiError::NotFound { message },
        409 => ApiError::Conflict { message },
        422 => ApiError::UnprocessableInput {
            message,
            issues: envelope.errors,
        },
        429 => ApiError::RateLimited {
            retry_after_secs,
            message,
        },
        code @ 500..=599 => ApiError::ServerError {
            status: code,
            message,
        },
        code => ApiError::UnexpectedStatus {
            status: code,
            message,
        },
    }
}

/// Classify a request that never produced a response
pub fn classify_network(message: impl Into<String>) -> ApiError {
    ApiError::NetworkUnreachable {
        message: message.into(),
    }
}

/// Whether a status is worth a backoff retry
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
}

fn default_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}
