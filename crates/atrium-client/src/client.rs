//! Authenticated API client
//!
//! Typed helpers (`get`, `post`, ...) decode the standard response envelope;
//! `send_raw` hands back the raw response for endpoints that do not use it.

use atrium_core::config::ClientConfig;
use atrium_core::envelope::{ApiEnvelope, Pagination};
use atrium_core::session::Session;
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::auth::AuthApi;
use crate::error::{ApiError, Result};
use crate::observer::{ClientObserver, NoopObserver};
use crate::pipeline::{Pipeline, RequestContext};
use crate::refresh::RefreshCoordinator;
use crate::transport::{RawResponse, ReqwestTransport, Transport, create_client, join_url};

/// Decoded payload of a successful call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: T,
    pub message: Option<String>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug)]
pub struct ApiClient {
    config: ClientConfig,
    session: Arc<Session>,
    pipeline: Pipeline,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    /// Client with the default reqwest transport and no metrics
    pub fn new(config: ClientConfig, session: Arc<Session>) -> Result<Self> {
        Self::builder(config, session).build()
    }

    pub fn builder(config: ClientConfig, session: Arc<Session>) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            session,
            observer: None,
            transport: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Login, registration and password endpoints
    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi::new(self)
    }

    /// Send a request through the pipeline and return the raw 2xx response
    pub async fn send_raw(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<RawResponse> {
        self.send_with_headers(method, path, body, HeaderMap::new())
            .await
    }

    /// Like [`send_raw`](Self::send_raw) with extra caller headers
    pub async fn send_with_headers(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        headers: HeaderMap,
    ) -> Result<RawResponse> {
        let mut ctx = RequestContext::new(method, path)
            .with_headers(headers)
            .auth_endpoint(self.config.is_auth_path(path));
        ctx.body = body;
        self.pipeline.execute(ctx).await
    }

    /// Send a request and decode the response envelope
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body
            .map(|b| serde_json::to_vec(b).map(Bytes::from))
            .transpose()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))?;

        let response = self.send_raw(method, path, body).await?;
        decode_envelope(&response.body)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        self.request::<(), T>(Method::DELETE, path, None).await
    }
}

/// Decode a 2xx body. An empty body or a missing `data` field decodes as
/// `null`, so `()` and `Option<_>` payloads work for bodiless endpoints.
fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<ApiResponse<T>> {
    let mut value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Response is not JSON: {}", e)))?
    };

    match &mut value {
        Value::Object(map) => {
            map.entry("data").or_insert(Value::Null);
        }
        Value::Null => {
            value = serde_json::json!({ "data": null });
        }
        _ => {
            return Err(ApiError::InvalidResponse(
                "Response body is not an envelope object".to_string(),
            ));
        }
    }

    let envelope: ApiEnvelope<T> = serde_json::from_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("Unexpected response shape: {}", e)))?;

    if !envelope.success {
        debug!("2xx response flagged as unsuccessful");
        return Err(ApiError::InvalidResponse(
            envelope
                .message
                .unwrap_or_else(|| "Request reported failure".to_string()),
        ));
    }

    Ok(ApiResponse {
        data: envelope.data,
        message: envelope.message,
        pagination: envelope.pagination,
    })
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    session: Arc<Session>,
    observer: Option<Arc<dyn ClientObserver>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ApiClientBuilder {
    /// Report retries, refreshes and completions to `observer`
    pub fn observer(mut self, observer: Arc<dyn ClientObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replace the reqwest transport used for API calls
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        self.config
            .validate()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        let http = create_client(&self.config)?;
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(ReqwestTransport::new(
                http.clone(),
                self.config.base_url.clone(),
            ))
        });

        let coordinator = RefreshCoordinator::new(
            http,
            join_url(&self.config.base_url, &self.config.refresh_path),
            self.session.clone(),
            observer.clone(),
        );
        let pipeline = Pipeline::standard(
            &self.config,
            self.session.clone(),
            coordinator.clone(),
            transport,
            observer,
        );

        Ok(ApiClient {
            config: self.config,
            session: self.session,
            pipeline,
            coordinator,
        })
    }
}
