//! Authentication endpoints
//!
//! Login and registration store the issued credentials in the session.
//! These endpoints never go through refresh-retry: a 401 from them is
//! surfaced as [`ApiError::CredentialsRejected`].

use atrium_core::store::Credentials;
use atrium_core::tenant::TenantId;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::client::{ApiClient, ApiResponse};
use crate::error::{ApiError, Result};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const ME_PATH: &str = "/auth/me";

/// Credentials and profile returned by login and registration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ForgotPasswordRequest<'a> {
    email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordRequest<'a> {
    token: &'a str,
    new_password: &'a str,
}

pub struct AuthApi<'a> {
    client: &'a ApiClient,
}

impl<'a> AuthApi<'a> {
    pub(crate) fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Authenticate and establish the session
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthPayload> {
        let response: ApiResponse<AuthPayload> = self
            .client
            .post(LOGIN_PATH, &LoginRequest { email, password })
            .await?;
        self.establish(response.data)
    }

    /// Create an account and establish the session
    pub async fn register<B: Serialize + ?Sized>(&self, registration: &B) -> Result<AuthPayload> {
        let response: ApiResponse<AuthPayload> =
            self.client.post(REGISTER_PATH, registration).await?;
        self.establish(response.data)
    }

    /// Tell the backend (best effort) and drop the local session
    pub async fn logout(&self) -> Result<()> {
        let session = self.client.session();
        if session.snapshot().is_authenticated()
            && let Err(e) = self
                .client
                .send_raw(Method::POST, LOGOUT_PATH, None)
                .await
        {
            warn!("Logout request failed, clearing local session anyway: {}", e);
        }

        session.logout()?;
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<Option<String>> {
        let response: ApiResponse<Value> = self
            .client
            .post(FORGOT_PASSWORD_PATH, &ForgotPasswordRequest { email })
            .await?;
        Ok(response.message)
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<Option<String>> {
        let response: ApiResponse<Value> = self
            .client
            .post(
                RESET_PASSWORD_PATH,
                &ResetPasswordRequest {
                    token,
                    new_password,
                },
            )
            .await?;
        Ok(response.message)
    }

    /// Profile of the authenticated user
    pub async fn me(&self) -> Result<Value> {
        let response: ApiResponse<Value> = self.client.get(ME_PATH).await?;
        Ok(response.data)
    }

    /// Ask the refresh endpoint for a new access token right away
    pub async fn refresh(&self) -> Result<String> {
        self.client
            .refresh_coordinator()
            .ensure_fresh_access_token()
            .await
            .ok_or(ApiError::AuthExpired)
    }

    fn establish(&self, payload: AuthPayload) -> Result<AuthPayload> {
        let tenant = match payload.tenant_id.as_deref() {
            Some(raw) => Some(
                TenantId::from_string(raw)
                    .map_err(|e| ApiError::InvalidResponse(format!("Invalid tenant id: {}", e)))?,
            ),
            None => None,
        };

        self.client
            .session()
            .login(
                Credentials::new(payload.access_token.clone(), payload.refresh_token.clone()),
                tenant,
            )?;
        info!("Authenticated");
        Ok(payload)
    }
}
