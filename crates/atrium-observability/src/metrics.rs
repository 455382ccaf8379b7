//! Metrics collection with Prometheus
//!
//! [`ClientMetrics`] implements the client's observer hooks:
//! - request counts by method and outcome
//! - request duration histogram
//! - retry counts by reason (backoff, refresh)
//! - token refresh counts by outcome
//! - error counts by taxonomy kind

use atrium_client::error::ErrorKind;
use atrium_client::observer::{ClientObserver, RefreshOutcome, RetryReason};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;

/// Metrics collector for the API client
#[derive(Clone)]
pub struct ClientMetrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Completed requests by method and outcome (`success` or error kind)
    pub requests_total: CounterVec,
    /// End-to-end duration, retries and refresh waits included
    pub request_duration_seconds: HistogramVec,
    /// Resends by reason
    pub retries_total: CounterVec,
    /// Token refreshes by outcome
    pub refresh_total: CounterVec,
    /// Surfaced errors by kind
    pub errors_total: CounterVec,
}

impl std::fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMetrics").finish_non_exhaustive()
    }
}

impl ClientMetrics {
    /// Create a collector with its own registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create a collector registering into `registry`
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = CounterVec::new(
            Opts::new("atrium_requests_total", "Total number of completed requests"),
            &["method", "outcome"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "atrium_request_duration_seconds",
                "Request duration in seconds, including retries",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["method"],
        )?;

        let retries_total = CounterVec::new(
            Opts::new("atrium_retries_total", "Total number of request resends"),
            &["reason"],
        )?;

        let refresh_total = CounterVec::new(
            Opts::new("atrium_refresh_total", "Total number of token refreshes"),
            &["outcome"],
        )?;

        let errors_total = CounterVec::new(
            Opts::new("atrium_errors_total", "Total number of surfaced errors"),
            &["kind"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(refresh_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            request_duration_seconds,
            retries_total,
            refresh_total,
            errors_total,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    pub fn record_request_success(&self, method: &str, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[method, "success"])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[method])
            .observe(duration_secs);
    }

    pub fn record_request_failure(&self, method: &str, kind: ErrorKind, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[method, kind.as_str()])
            .inc();
        self.errors_total.with_label_values(&[kind.as_str()]).inc();
        self.request_duration_seconds
            .with_label_values(&[method])
            .observe(duration_secs);
    }

    pub fn record_retry(&self, reason: RetryReason) {
        self.retries_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    pub fn record_refresh(&self, outcome: RefreshOutcome) {
        self.refresh_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }
}

impl ClientObserver for ClientMetrics {
    fn on_retry(&self, _method: &Method, reason: RetryReason) {
        self.record_retry(reason);
    }

    fn on_refresh(&self, outcome: RefreshOutcome) {
        self.record_refresh(outcome);
    }

    fn on_complete(
        &self,
        method: &Method,
        result: Result<StatusCode, ErrorKind>,
        elapsed: Duration,
    ) {
        match result {
            Ok(_) => self.record_request_success(method.as_str(), elapsed.as_secs_f64()),
            Err(kind) => {
                self.record_request_failure(method.as_str(), kind, elapsed.as_secs_f64())
            }
        }
    }
}
