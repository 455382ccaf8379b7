//! Caller-facing error taxonomy
//!
//! Every failure surfaced by the client is one `ApiError` variant, so callers
//! can match exhaustively instead of probing optional payload fields.

use atrium_core::envelope::FieldIssue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// No response received (connection failure, timeout)
    #[error("Network unreachable: {message}")]
    NetworkUnreachable { message: String },

    /// 5xx from the backend
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Session could not be renewed; the user has to log in again
    #[error("Authentication expired, please sign in again")]
    AuthExpired,

    /// 401 from an authentication endpoint (wrong credentials, bad reset token)
    #[error("Credentials rejected: {message}")]
    CredentialsRejected { message: String },

    /// 400, one issue per rejected field
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        issues: Vec<FieldIssue>,
    },

    /// 403
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// 404
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// 409
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// 429, never retried automatically
    #[error("Rate limit exceeded{}", retry_after_secs.map(|s| format!(": retry after {}s", s)).unwrap_or_default())]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    /// 422
    #[error("Unprocessable input: {message}")]
    UnprocessableInput {
        message: String,
        issues: Vec<FieldIssue>,
    },

    /// Any status outside the taxonomy above
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// A 2xx whose body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The client could not be built or the request could not be formed
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Credentials could not be written to or removed from a store
    #[error("Session storage failed: {0}")]
    Storage(String),
}

/// Fieldless discriminant of [`ApiError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NetworkUnreachable,
    ServerError,
    AuthExpired,
    CredentialsRejected,
    Validation,
    PermissionDenied,
    NotFound,
    Conflict,
    RateLimited,
    UnprocessableInput,
    UnexpectedStatus,
    InvalidResponse,
    Config,
    Storage,
}

impl ErrorKind {
    /// Stable snake_case label
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkUnreachable => "network_unreachable",
            ErrorKind::ServerError => "server_error",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::CredentialsRejected => "credentials_rejected",
            ErrorKind::Validation => "validation",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UnprocessableInput => "unprocessable_input",
            ErrorKind::UnexpectedStatus => "unexpected_status",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Config => "config",
            ErrorKind::Storage => "storage",
        }
    }
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NetworkUnreachable { .. } => ErrorKind::NetworkUnreachable,
            ApiError::ServerError { .. } => ErrorKind::ServerError,
            ApiError::AuthExpired => ErrorKind::AuthExpired,
            ApiError::CredentialsRejected { .. } => ErrorKind::CredentialsRejected,
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            ApiError::NotFound { .. } => ErrorKind::NotFound,
            ApiError::Conflict { .. } => ErrorKind::Conflict,
            ApiError::RateLimited { .. } => ErrorKind::RateLimited,
            ApiError::UnprocessableInput { .. } => ErrorKind::UnprocessableInput,
            ApiError::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            ApiError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            ApiError::Config(_) => ErrorKind::Config,
            ApiError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Field-level issues carried by validation failures
    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            ApiError::Validation { issues, .. } | ApiError::UnprocessableInput { issues, .. } => {
                issues
            }
            _ => &[],
        }
    }

    /// Whether the user must authenticate again
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, ApiError::AuthExpired)
    }

    /// HTTP status behind the error, when one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::ServerError { status, .. } | ApiError::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            ApiError::AuthExpired | ApiError::CredentialsRejected { .. } => Some(401),
            ApiError::Validation { .. } => Some(400),
            ApiError::PermissionDenied { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Conflict { .. } => Some(409),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::UnprocessableInput { .. } => Some(422),
            ApiError::NetworkUnreachable { .. }
            | ApiError::InvalidResponse(_)
            | ApiError::Config(_)
            | ApiError::Storage(_) => None,
        }
    }
}

impl From<atrium_core::Error> for ApiError {
    fn from(err: atrium_core::Error) -> Self {
        ApiError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
