//! Single-flight access token refresh
//!
//! Every refresh need, proactive (before sending) or reactive (after a 401),
//! goes through one [`RefreshCoordinator`]. While a refresh is running, late
//! callers attach to the same shared future instead of starting a second
//! network call, so a backend that rotates refresh tokens on use never sees
//! two competing refreshes.
//!
//! State machine:
//! - idle: the next caller spawns the refresh and stores its shared handle
//! - in flight: callers clone the handle and await it
//! - the refresh task clears the handle when it finishes, whatever the result

use atrium_core::claims::{self, NO_BUFFER};
use atrium_core::session::Session;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::observer::{ClientObserver, RefreshOutcome};

type RefreshFlight = Shared<BoxFuture<'static, Option<String>>>;

/// Why a refresh call failed
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh endpoint returned status {0}")]
    Status(u16),

    #[error("refresh endpoint unreachable: {0}")]
    Network(String),

    #[error("refresh response was invalid: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// The backend answers either with the standard envelope or with the bare
/// token pair.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RefreshResponse {
    Enveloped { data: IssuedTokens },
    Bare(IssuedTokens),
}

impl RefreshResponse {
    fn into_tokens(self) -> IssuedTokens {
        match self {
            RefreshResponse::Enveloped { data } => data,
            RefreshResponse::Bare(tokens) => tokens,
        }
    }
}

struct Inner {
    http: Client,
    refresh_url: String,
    session: Arc<Session>,
    observer: Arc<dyn ClientObserver>,
    in_flight: Mutex<Option<RefreshFlight>>,
}

/// Deduplicates concurrent refreshes of one session
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_url", &self.inner.refresh_url)
            .field("in_flight", &self.is_refreshing())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        http: Client,
        refresh_url: impl Into<String>,
        session: Arc<Session>,
        observer: Arc<dyn ClientObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                refresh_url: refresh_url.into(),
                session,
                observer,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Obtain a freshly issued access token.
    ///
    /// Returns `None` when the session cannot be renewed; in that case the
    /// session has been cleared and [`SessionEvent::Expired`] published.
    /// Refresh failures are never retried here.
    ///
    /// Must be called from within a Tokio runtime: the refresh runs as its
    /// own task so that it completes even if every waiter is cancelled.
    ///
    /// [`SessionEvent::Expired`]: atrium_core::session::SessionEvent::Expired
    pub async fn ensure_fresh_access_token(&self) -> Option<String> {
        let flight = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match slot.as_ref() {
                Some(flight) => {
                    debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    // The task cannot clear the slot before we fill it: it
                    // needs this lock to do so.
                    let task = tokio::spawn(async move {
                        let token = inner.refresh().await;
                        inner
                            .in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        token
                    });

                    let flight = async move {
                        task.await.unwrap_or_else(|e| {
                            warn!("Token refresh task failed: {}", e);
                            None
                        })
                    }
                    .boxed()
                    .shared();

                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Obtain a token to resend a request the server rejected with 401.
    ///
    /// If the session already holds a different, unexpired access token than
    /// the one the request carried, another request refreshed in the
    /// meantime and that token is returned without a network call.
    pub async fn refresh_after_rejection(&self, rejected: Option<&str>) -> Option<String> {
        if let (Some(rejected), Some(current)) = (rejected, self.inner.session.access_token())
            && current != rejected
            && !claims::is_expired_or_expiring_soon(&current, NO_BUFFER)
        {
            debug!("Access token already replaced since the rejected request was sent");
            return Some(current);
        }

        self.ensure_fresh_access_token().await
    }
}

impl Inner {
    async fn refresh(&self) -> Option<String> {
        let snapshot = self.session.snapshot();
        let generation = snapshot.generation;
        let refresh_token = match snapshot.refresh_token() {
            Some(token) if !claims::is_expired_or_expiring_soon(token, NO_BUFFER) => {
                token.to_string()
            }
            Some(_) => {
                info!("Refresh token expired, reauthentication required");
                return self.give_up(generation, RefreshOutcome::Skipped);
            }
            None => {
                info!("No refresh token available, reauthentication required");
                return self.give_up(generation, RefreshOutcome::Skipped);
            }
        };

        debug!("Refreshing access token");
        match self.call_refresh_endpoint(&refresh_token).await {
            Ok(tokens) => {
                if tokens.refresh_token.is_some() {
                    debug!("Refresh token rotated");
                }
                let access_token = tokens.access_token;
                match self.session.commit_refresh(
                    generation,
                    access_token.clone(),
                    tokens.refresh_token,
                ) {
                    Ok(false) => {
                        info!("Session changed while refreshing, issued tokens discarded");
                        self.observer.on_refresh(RefreshOutcome::Discarded);
                        return self.session.access_token().filter(|current| {
                            !claims::is_expired_or_expiring_soon(current, NO_BUFFER)
                        });
                    }
                    Ok(true) => {}
                    Err(e) => warn!("Refreshed credentials could not be persisted: {}", e),
                }

                info!("Access token refreshed");
                self.observer.on_refresh(RefreshOutcome::Success);
                Some(access_token)
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.give_up(generation, RefreshOutcome::Failure)
            }
        }
    }

    fn give_up(&self, generation: u64, outcome: RefreshOutcome) -> Option<String> {
        self.observer.on_refresh(outcome);
        self.session.expire_if_current(generation);
        None
    }

    async fn call_refresh_endpoint(
        &self,
        refresh_token: &str,
    ) -> Result<IssuedTokens, RefreshError> {
        let response = self
            .http
            .post(&self.refresh_url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;
        let tokens = serde_json::from_slice::<RefreshResponse>(&body)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?
            .into_tokens();

        if tokens.access_token.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "empty access token".to_string(),
            ));
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use atrium_core::session::SessionEvent;
    use atrium_core::store::{CredentialStore, Credentials, FileCredentialStore};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token(exp_offset_secs: i64, subject: &str) -> String {
        let exp = chrono::Utc::now().timestamp() + exp_offset_secs;
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
        let payload = URL_SAFE_NO_PAD.encode(json!({"exp": exp, "sub": subject}).to_string());
        format!("{header}.{payload}.sig")
    }

    fn coordinator(server: &MockServer, session: Arc<Session>) -> RefreshCoordinator {
        RefreshCoordinator::new(
            Client::new(),
            format!("{}/auth/refresh", server.uri()),
            session,
            Arc::new(NoopObserver),
        )
    }

    #[tokio::test]
    async fn test_refresh_stores_new_access_token() {
        let server = MockServer::start().await;
        let refresh = token(3600, "refresh");
        let fresh = token(900, "fresh");

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refreshToken": refresh})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"accessToken": fresh}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(Session::in_memory());
        session
            .login(Credentials::new(token(-10, "old"), refresh.clone()), None)
            .unwrap();

        let result = coordinator(&server, session.clone())
            .ensure_fresh_access_token()
            .await;

        assert_eq!(result.as_deref(), Some(fresh.as_str()));
        assert_eq!(session.access_token(), Some(fresh.clone()));
        assert_eq!(session.refresh_token(), Some(refresh));
        assert!(!claims::is_expired_or_expiring_soon(&fresh, NO_BUFFER));
    }

    #[tokio::test]
    async fn test_refresh_accepts_bare_body_and_rotation() {
        let server = MockServer::start().await;
        let fresh = token(900, "fresh");
        let rotated = token(7 * 24 * 3600, "rotated");

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": fresh,
                "refreshToken": rotated
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(Session::in_memory());
        session
            .login(Credentials::new(token(-10, "old"), token(3600, "r")), None)
            .unwrap();

        coordinator(&server, session.clone())
            .ensure_fresh_access_token()
            .await
            .unwrap();
        assert_eq!(session.refresh_token(), Some(rotated));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        let fresh = token(900, "fresh");

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"accessToken": fresh}}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(Session::in_memory());
        session
            .login(Credentials::new(token(-10, "old"), token(3600, "r")), None)
            .unwrap();
        let coordinator = coordinator(&server, session);

        let results = futures::future::join_all(
            (0..5).map(|_| coordinator.ensure_fresh_access_token()),
        )
        .await;

        assert!(results.iter().all(|r| r.as_deref() == Some(fresh.as_str())));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let session = Arc::new(Session::in_memory());
        session
            .login(Credentials::new(token(-10, "old"), token(-5, "dead")), None)
            .unwrap();
        let mut events = session.subscribe();

        let result = coordinator(&server, session.clone())
            .ensure_fresh_access_token()
            .await;

        assert!(result.is_none());
        assert!(session.access_token().is_none());
        assert!(session.refresh_token().is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Expired);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let session = Arc::new(Session::in_memory());
        assert!(
            coordinator(&server, session)
                .ensure_fresh_access_token()
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(Session::in_memory());
        session
            .login(Credentials::new(token(-10, "old"), token(3600, "r")), None)
            .unwrap();
        let coordinator = coordinator(&server, session.clone());

        let results = futures::future::join(
            coordinator.ensure_fresh_access_token(),
            coordinator.ensure_fresh_access_token(),
        )
        .await;

        assert_eq!(results, (None, None));
        assert!(session.snapshot().state.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .mount(&server)
            .await;

        let session = Arc::new(Session::in_memory());
        session
            .login(Credentials::new(token(-10, "old"), token(3600, "r")), None)
            .unwrap();

        assert!(
            coordinator(&server, session.clone())
                .ensure_fresh_access_token()
                .await
                .is_none()
        );
        assert!(session.refresh_token().is_none());
    }

    #[tokio::test]
    async fn test_rejection_uses_token_refreshed_meanwhile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let current = token(900, "current");
        let session = Arc::new(Session::in_memory());
        session
            .login(Credentials::new(current.clone(), token(3600, "r")), None)
            .unwrap();

        let result = coordinator(&server, session)
            .refresh_after_rejection(Some("stale-token"))
            .await;
        assert_eq!(result, Some(current));
    }

    #[tokio::test]
    async fn test_logout_during_refresh_discards_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "data": {
                            "accessToken": token(900, "fresh"),
                            "refreshToken": token(3600, "rotated")
                        }
                    }))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let file = Arc::new(FileCredentialStore::new(temp_dir.path().join("s.json")).unwrap());
        let session = Arc::new(Session::builder().store(file.clone()).build());
        session
            .login(Credentials::new(token(-10, "old"), token(3600, "r")), None)
            .unwrap();
        let coordinator = coordinator(&server, session.clone());

        let refresh = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_fresh_access_token().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.logout().unwrap();

        assert!(refresh.await.unwrap().is_none());
        assert!(session.snapshot().state.is_empty());
        assert!(file.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_spares_newer_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let session = Arc::new(Session::in_memory());
        session
            .login(Credentials::new(token(-10, "old"), token(3600, "r")), None)
            .unwrap();
        let coordinator = coordinator(&server, session.clone());

        let refresh = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_fresh_access_token().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let relogin = token(900, "again");
        session
            .login(Credentials::new(relogin.clone(), token(3600, "r2")), None)
            .unwrap();

        assert!(refresh.await.unwrap().is_none());
        assert_eq!(session.access_token(), Some(relogin));
    }
}
