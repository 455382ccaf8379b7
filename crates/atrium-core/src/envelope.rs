//! Response envelope shared by every backend endpoint

use serde::{Deserialize, Serialize};

/// Standard response body: `{success, data, message?, errors?, pagination?}`
///
/// A missing `success` flag is read as `true`; only an explicit `false`
/// marks the payload as a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,

    pub data: T,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldIssue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

fn default_success() -> bool {
    true
}

/// Error body returned with non-2xx statuses.
///
/// `data` is usually absent or null on failures, so it is not required here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub message: Option<String>,

    /// Some handlers use `error` instead of `message`
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub errors: Vec<FieldIssue>,
}

impl ErrorEnvelope {
    /// The human-readable message, whichever key carried it
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

/// One field-level validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// Pagination block for list endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}
