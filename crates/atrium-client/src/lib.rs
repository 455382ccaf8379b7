//! Atrium authenticated API client
//!
//! This crate sends requests to the Atrium backend on behalf of a session:
//! - attaches the bearer token and tenant header to every request
//! - refreshes expiring tokens before sending and rejected tokens after a 401,
//!   with at most one refresh in flight per session
//! - retries network errors and 5xx with exponential backoff
//! - classifies every failure into [`ApiError`]

pub mod auth;
pub mod classify;
pub mod client;
pub mod error;
pub mod observer;
pub mod pipeline;
pub mod refresh;
pub mod retry;
pub mod retry_after;
pub mod transport;

pub use auth::{AuthApi, AuthPayload};
pub use client::{ApiClient, ApiClientBuilder, ApiResponse};
pub use error::{ApiError, ErrorKind, Result};
pub use observer::{ClientObserver, NoopObserver, RefreshOutcome, RetryReason};
pub use pipeline::{Decision, Pipeline, RequestContext, RequestRecord};
pub use refresh::RefreshCoordinator;
pub use retry::RetryPolicy;
pub use retry_after::parse_retry_after;
pub use transport::{Outcome, RawResponse, ReqwestTransport, Transport};
