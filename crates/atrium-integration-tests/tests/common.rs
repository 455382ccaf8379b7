//! Common test utilities for integration tests

use atrium_client::ApiClient;
use atrium_core::config::ClientConfig;
use atrium_core::session::Session;
use atrium_core::store::Credentials;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Backoff base used by test clients: retries wait 10ms, 20ms, 40ms
#[allow(dead_code)]
pub const TEST_BASE_DELAY: Duration = Duration::from_millis(10);

/// Unsigned token whose `exp` is `exp_offset_secs` from now
pub fn token(exp_offset_secs: i64, subject: &str) -> String {
    let exp = chrono::Utc::now().timestamp() + exp_offset_secs;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"exp": exp, "sub": subject}).to_string());
    format!("{header}.{payload}.signature")
}

#[allow(dead_code)]
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Client config pointed at the mock server with fast retries
pub fn test_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        timeout_secs: 2,
        retry_base_delay_ms: TEST_BASE_DELAY.as_millis() as u64,
        ..ClientConfig::default()
    }
}

/// Client over an in-memory session holding the given tokens
#[allow(dead_code)]
pub fn logged_in_client(
    server: &MockServer,
    access_token: &str,
    refresh_token: &str,
) -> (ApiClient, Arc<Session>) {
    let session = Arc::new(Session::in_memory());
    session
        .login(Credentials::new(access_token, refresh_token), None)
        .unwrap();
    let client = ApiClient::new(test_config(server), session.clone()).unwrap();
    (client, session)
}

/// Refresh endpoint issuing `access_token`, answering after `delay`
#[allow(dead_code)]
pub fn refresh_mock(access_token: &str, delay: Duration) -> Mock {
    Mock::given(method("POST")).and(path("/auth/refresh")).respond_with(
        ResponseTemplate::new(200)
            .set_body_json(json!({
                "success": true,
                "data": {"accessToken": access_token}
            }))
            .set_delay(delay),
    )
}

#[allow(dead_code)]
pub fn ok_json(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data}))
}
