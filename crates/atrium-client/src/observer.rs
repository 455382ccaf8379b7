//! Hooks for metrics collection
//!
//! The client reports what it does through a [`ClientObserver`]; the
//! observability crate implements it on top of Prometheus.

use reqwest::{Method, StatusCode};
use std::time::Duration;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Network error or 5xx, resent after a backoff delay
    Backoff,
    /// 401, resent once after the session was refreshed
    Refresh,
}

impl RetryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryReason::Backoff => "backoff",
            RetryReason::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The refresh endpoint issued a new access token
    Success,
    /// The refresh endpoint rejected the call or could not be reached
    Failure,
    /// No usable refresh token; no network call was made
    Skipped,
    /// Tokens were issued but the session was cleared or replaced meanwhile
    Discarded,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Success => "success",
            RefreshOutcome::Failure => "failure",
            RefreshOutcome::Skipped => "skipped",
            RefreshOutcome::Discarded => "discarded",
        }
    }
}

/// Receives client events. All methods default to no-ops.
pub trait ClientObserver: Send + Sync {
    fn on_retry(&self, _method: &Method, _reason: RetryReason) {}

    fn on_refresh(&self, _outcome: RefreshOutcome) {}

    fn on_complete(
        &self,
        _method: &Method,
        _result: Result<StatusCode, ErrorKind>,
        _elapsed: Duration,
    ) {
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ClientObserver for NoopObserver {}
