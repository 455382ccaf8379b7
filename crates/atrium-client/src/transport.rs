//! HTTP transport: the shared reqwest client and the wire call itself

use async_trait::async_trait;
use atrium_core::config::ClientConfig;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::pipeline::RequestContext;

/// Response as received from the wire
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Result of one attempt on the wire
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A response arrived, whatever its status
    Response(RawResponse),
    /// No response: connect failure, reset, timeout
    Network(String),
}

impl Outcome {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Outcome::Response(response) => Some(response.status),
            Outcome::Network(_) => None,
        }
    }
}

/// Sends one fully prepared request
#[async_trait]
pub trait Transport: Send + Sync {
    /// `Err` is reserved for requests that cannot be sent at all (bad URL,
    /// bad header); anything that happened on the wire is an [`Outcome`].
    async fn send(&self, ctx: &RequestContext) -> Result<Outcome>;
}

/// Create a configured HTTP client with connection pooling
pub fn create_client(config: &ClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .timeout(config.timeout())
        .connect_timeout(config.connect_timeout())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        // Expire idle connections before the backend closes them
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(&config.user_agent)
        .build()
        .map_err(|e| ApiError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Join the base URL and a request path
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, ctx: &RequestContext) -> Result<Outcome> {
        let url = join_url(&self.base_url, &ctx.path);

        let mut request = self
            .client
            .request(ctx.method.clone(), &url)
            .headers(ctx.headers.clone());
        if let Some(body) = &ctx.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(ApiError::Config(format!("Invalid request to {}: {}", url, e)));
            }
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("Request to {} timed out", url)
                } else {
                    format!("Request to {} failed: {}", url, e)
                };
                warn!(request_id = %ctx.record.request_id, "{}", message);
                return Ok(Outcome::Network(message));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        debug!(request_id = %ctx.record.request_id, status = status.as_u16(), "Response received");

        match response.bytes().await {
            Ok(body) => Ok(Outcome::Response(RawResponse {
                status,
                headers,
                body,
            })),
            // The body stream broke: no usable response arrived
            Err(e) => Ok(Outcome::Network(format!(
                "Failed to read response body from {}: {}",
                url, e
            ))),
        }
    }
}
