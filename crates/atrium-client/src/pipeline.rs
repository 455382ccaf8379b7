//! Ordered request/response pipeline
//!
//! One call flows through:
//! 1. request stages, in order, each preparing the attempt (headers,
//!    proactive refresh, bearer, tenant); an `Err` aborts without sending
//! 2. the transport
//! 3. response stages, in order, until one returns a [`Decision`]
//!
//! A `Retry` decision loops back to step 1 with the same [`RequestRecord`],
//! so the one-shot refresh flag and the backoff counter survive retries.

mod request;
mod response;

pub use request::{AttachBearer, AttachTenant, DefaultHeaders, ProactiveRefresh};
pub use response::{BackoffRetry, Classify, ReactiveRefresh};

use async_trait::async_trait;
use atrium_core::config::ClientConfig;
use atrium_core::session::Session;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Method;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::observer::{ClientObserver, NoopObserver, RetryReason};
use crate::refresh::RefreshCoordinator;
use crate::retry::RetryPolicy;
use crate::transport::{Outcome, RawResponse, Transport};

/// Per-call metadata, created when a request enters the pipeline
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request_id: String,
    pub started_at: DateTime<Utc>,
    pub retry_count: u32,
    /// At most one reactive refresh per call, across all retries
    pub refresh_attempted: bool,
    started: Instant,
}

impl RequestRecord {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            retry_count: 0,
            refresh_attempted: false,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for RequestRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// One logical call and the state of its current attempt
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub body: Option<Bytes>,
    /// Headers supplied by the caller
    pub base_headers: HeaderMap,
    /// Headers of the current attempt, rebuilt from `base_headers` each time
    pub headers: HeaderMap,
    pub record: RequestRecord,
    /// Access token attached to the current attempt
    pub bearer: Option<String>,
    /// Login/register/password endpoints: no refresh, 401 is a rejection
    pub auth_endpoint: bool,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            base_headers: HeaderMap::new(),
            headers: HeaderMap::new(),
            record: RequestRecord::new(),
            bearer: None,
            auth_endpoint: false,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.base_headers = headers;
        self
    }

    pub fn auth_endpoint(mut self, auth_endpoint: bool) -> Self {
        self.auth_endpoint = auth_endpoint;
        self
    }

    fn reset_attempt(&mut self) {
        self.headers = self.base_headers.clone();
        self.bearer = None;
    }
}

/// Prepares an attempt before it is sent
#[async_trait]
pub trait RequestStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn prepare(&self, ctx: &mut RequestContext) -> Result<()>;
}

/// What to do with an attempt's outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accept,
    Retry { delay: Duration, reason: RetryReason },
    Fail(ApiError),
}

/// Inspects an attempt's outcome. `None` passes it to the next stage.
#[async_trait]
pub trait ResponseStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn inspect(&self, ctx: &mut RequestContext, outcome: &Outcome) -> Option<Decision>;
}

pub struct Pipeline {
    request_stages: Vec<Box<dyn RequestStage>>,
    response_stages: Vec<Box<dyn ResponseStage>>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn ClientObserver>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field(
                "request_stages",
                &self.request_stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field(
                "response_stages",
                &self.response_stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            request_stages: Vec::new(),
            response_stages: Vec::new(),
            transport,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn request_stage(mut self, stage: impl RequestStage + 'static) -> Self {
        self.request_stages.push(Box::new(stage));
        self
    }

    pub fn response_stage(mut self, stage: impl ResponseStage + 'static) -> Self {
        self.response_stages.push(Box::new(stage));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ClientObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The authenticated pipeline: refresh-retry before backoff-retry,
    /// classification last
    pub fn standard(
        config: &ClientConfig,
        session: Arc<Session>,
        coordinator: RefreshCoordinator,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn ClientObserver>,
    ) -> Self {
        Self::new(transport)
            .observer(observer)
            .request_stage(DefaultHeaders)
            .request_stage(ProactiveRefresh::new(
                session.clone(),
                coordinator.clone(),
                config.refresh_buffer(),
            ))
            .request_stage(AttachBearer::new(session.clone()))
            .request_stage(AttachTenant::new(session.clone(), &config.tenant_header))
            .response_stage(ReactiveRefresh::new(session, coordinator))
            .response_stage(BackoffRetry::new(RetryPolicy::from_config(config)))
            .response_stage(Classify)
    }

    /// Run one call to completion
    pub async fn execute(&self, mut ctx: RequestContext) -> Result<RawResponse> {
        let span = info_span!(
            "request",
            request_id = %ctx.record.request_id,
            method = %ctx.method,
            path = %ctx.path,
        );
        let method = ctx.method.clone();

        let result = self.run(&mut ctx).instrument(span).await;

        self.observer.on_complete(
            &method,
            result
                .as_ref()
                .map(|response| response.status)
                .map_err(ApiError::kind),
            ctx.record.elapsed(),
        );
        result
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<RawResponse> {
        loop {
            ctx.reset_attempt();
            for stage in &self.request_stages {
                stage.prepare(ctx).await?;
            }

            let outcome = self.transport.send(ctx).await?;

            let mut decision = None;
            for stage in &self.response_stages {
                if let Some(d) = stage.inspect(ctx, &outcome).await {
                    debug!(stage = stage.name(), "Response stage decided");
                    decision = Some(d);
                    break;
                }
            }

            match decision.unwrap_or(Decision::Accept) {
                Decision::Accept => {
                    return match outcome {
                        Outcome::Response(response) => Ok(response),
                        Outcome::Network(message) => {
                            Err(ApiError::NetworkUnreachable { message })
                        }
                    };
                }
                Decision::Retry { delay, reason } => {
                    debug!(
                        reason = reason.as_str(),
                        retry_count = ctx.record.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying request"
                    );
                    self.observer.on_retry(&ctx.method, reason);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Decision::Fail(error) => return Err(error),
            }
        }
    }
}
