//! Pre-send stages

use async_trait::async_trait;
use atrium_core::claims;
use atrium_core::session::Session;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RequestContext, RequestStage};
use crate::error::{ApiError, Result};
use crate::refresh::RefreshCoordinator;

const REQUEST_ID_HEADER: &str = "x-request-id";
const JSON: &str = "application/json";

/// JSON content negotiation and the request id
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHeaders;

#[async_trait]
impl RequestStage for DefaultHeaders {
    fn name(&self) -> &'static str {
        "default_headers"
    }

    async fn prepare(&self, ctx: &mut RequestContext) -> Result<()> {
        if !ctx.headers.contains_key(CONTENT_TYPE) {
            ctx.headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        }
        if !ctx.headers.contains_key(ACCEPT) {
            ctx.headers.insert(ACCEPT, HeaderValue::from_static(JSON));
        }
        let request_id = HeaderValue::from_str(&ctx.record.request_id)
            .map_err(|e| ApiError::Config(format!("Invalid request id: {}", e)))?;
        ctx.headers
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), request_id);
        Ok(())
    }
}

/// Refreshes an access token that is about to expire before sending
#[derive(Debug, Clone)]
pub struct ProactiveRefresh {
    session: Arc<Session>,
    coordinator: RefreshCoordinator,
    buffer: Duration,
}

impl ProactiveRefresh {
    pub fn new(session: Arc<Session>, coordinator: RefreshCoordinator, buffer: Duration) -> Self {
        Self {
            session,
            coordinator,
            buffer,
        }
    }
}

#[async_trait]
impl RequestStage for ProactiveRefresh {
    fn name(&self) -> &'static str {
        "proactive_refresh"
    }

    async fn prepare(&self, ctx: &mut RequestContext) -> Result<()> {
        if ctx.auth_endpoint {
            return Ok(());
        }
        let Some(token) = self.session.access_token() else {
            return Ok(());
        };
        if !claims::is_expired_or_expiring_soon(&token, self.buffer) {
            return Ok(());
        }

        debug!(request_id = %ctx.record.request_id, "Access token expiring, refreshing before send");
        match self.coordinator.ensure_fresh_access_token().await {
            Some(_) => Ok(()),
            None => {
                warn!(request_id = %ctx.record.request_id, "Session could not be refreshed, request not sent");
                Err(ApiError::AuthExpired)
            }
        }
    }
}

/// `Authorization: Bearer <token>` from the session's current token
#[derive(Debug, Clone)]
pub struct AttachBearer {
    session: Arc<Session>,
}

impl AttachBearer {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl RequestStage for AttachBearer {
    fn name(&self) -> &'static str {
        "attach_bearer"
    }

    async fn prepare(&self, ctx: &mut RequestContext) -> Result<()> {
        let Some(token) = self.session.access_token() else {
            return Ok(());
        };
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::Config("Access token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        ctx.headers.insert(AUTHORIZATION, value);
        ctx.bearer = Some(token);
        Ok(())
    }
}

/// Tenant scoping header, when the session carries a tenant
#[derive(Debug, Clone)]
pub struct AttachTenant {
    session: Arc<Session>,
    header: String,
}

impl AttachTenant {
    pub fn new(session: Arc<Session>, header: impl Into<String>) -> Self {
        Self {
            session,
            header: header.into(),
        }
    }
}

#[async_trait]
impl RequestStage for AttachTenant {
    fn name(&self) -> &'static str {
        "attach_tenant"
    }

    async fn prepare(&self, ctx: &mut RequestContext) -> Result<()> {
        let Some(tenant) = self.session.tenant() else {
            return Ok(());
        };
        let name = HeaderName::from_bytes(self.header.as_bytes())
            .map_err(|e| ApiError::Config(format!("Invalid tenant header name: {}", e)))?;
        let value = HeaderValue::from_str(tenant.as_str())
            .map_err(|e| ApiError::Config(format!("Invalid tenant id: {}", e)))?;
        ctx.headers.insert(name, value);
        Ok(())
    }
}
