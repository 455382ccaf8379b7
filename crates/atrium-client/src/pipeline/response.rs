//! Post-receive stages, in priority order: refresh-retry, backoff-retry,
//! classification

use async_trait::async_trait;
use atrium_core::session::Session;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Decision, RequestContext, ResponseStage};
use crate::classify::{classify_network, classify_status, is_transient_status};
use crate::error::ApiError;
use crate::observer::RetryReason;
use crate::refresh::RefreshCoordinator;
use crate::retry::RetryPolicy;
use crate::retry_after::retry_after_from_headers;
use crate::transport::Outcome;

/// Resends a request rejected with 401 once, after refreshing the session
#[derive(Debug, Clone)]
pub struct ReactiveRefresh {
    session: Arc<Session>,
    coordinator: RefreshCoordinator,
}

impl ReactiveRefresh {
    pub fn new(session: Arc<Session>, coordinator: RefreshCoordinator) -> Self {
        Self {
            session,
            coordinator,
        }
    }
}

#[async_trait]
impl ResponseStage for ReactiveRefresh {
    fn name(&self) -> &'static str {
        "reactive_refresh"
    }

    async fn inspect(&self, ctx: &mut RequestContext, outcome: &Outcome) -> Option<Decision> {
        if ctx.auth_endpoint || outcome.status() != Some(StatusCode::UNAUTHORIZED) {
            return None;
        }
        if ctx.bearer.is_none() {
            debug!(request_id = %ctx.record.request_id, "Anonymous request rejected, no session to refresh");
            return Some(Decision::Fail(ApiError::AuthExpired));
        }

        if ctx.record.refresh_attempted {
            warn!(request_id = %ctx.record.request_id, "Request rejected again after refresh");
            self.session.expire();
            return Some(Decision::Fail(ApiError::AuthExpired));
        }
        ctx.record.refresh_attempted = true;

        info!(request_id = %ctx.record.request_id, "Access token rejected, refreshing session");
        match self
            .coordinator
            .refresh_after_rejection(ctx.bearer.as_deref())
            .await
        {
            Some(_) => Some(Decision::Retry {
                delay: Duration::ZERO,
                reason: RetryReason::Refresh,
            }),
            None => Some(Decision::Fail(ApiError::AuthExpired)),
        }
    }
}

/// Resends after network errors and 5xx with exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct BackoffRetry {
    policy: RetryPolicy,
}

impl BackoffRetry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl ResponseStage for BackoffRetry {
    fn name(&self) -> &'static str {
        "backoff_retry"
    }

    async fn inspect(&self, ctx: &mut RequestContext, outcome: &Outcome) -> Option<Decision> {
        let transient = match outcome {
            Outcome::Network(_) => true,
            Outcome::Response(response) => is_transient_status(response.status),
        };
        if !transient || !self.policy.allows(ctx.record.retry_count) {
            return None;
        }

        ctx.record.retry_count += 1;
        let delay = self.policy.delay_for(ctx.record.retry_count);
        warn!(
            request_id = %ctx.record.request_id,
            retry = ctx.record.retry_count,
            max_retries = self.policy.max_retries,
            status = outcome.status().map(|s| s.as_u16()),
            "Transient failure, retrying after {:?}",
            delay
        );
        Some(Decision::Retry {
            delay,
            reason: RetryReason::Backoff,
        })
    }
}

/// Accepts 2xx and classifies everything else
#[derive(Debug, Default, Clone, Copy)]
pub struct Classify;

#[async_trait]
impl ResponseStage for Classify {
    fn name(&self) -> &'static str {
        "classify"
    }

    async fn inspect(&self, ctx: &mut RequestContext, outcome: &Outcome) -> Option<Decision> {
        let decision = match outcome {
            Outcome::Response(response) if response.status.is_success() => Decision::Accept,
            Outcome::Response(response) => Decision::Fail(classify_status(
                response.status,
                &response.body,
                retry_after_from_headers(&response.headers),
                ctx.auth_endpoint,
            )),
            Outcome::Network(message) => Decision::Fail(classify_network(message.clone())),
        };
        Some(decision)
    }
}
