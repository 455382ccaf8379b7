//! Integration tests: classification of failed responses

mod common;

use atrium_client::{ApiClient, ApiError, ErrorKind};
use atrium_core::envelope::FieldIssue;
use atrium_core::session::Session;
use common::{logged_in_client, test_config, token};
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn error_for(status: u16, body: Value) -> ApiError {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(test_config(&server), Arc::new(Session::in_memory())).unwrap();
    client.get::<Value>("/resource").await.unwrap_err()
}

#[tokio::test]
async fn test_validation_error_lists_each_field() {
    let err = error_for(
        400,
        json!({
            "success": false,
            "message": "Validation failed",
            "errors": [{"field": "email", "message": "invalid", "code": "E1"}]
        }),
    )
    .await;

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.issues(),
        &[FieldIssue {
            field: "email".to_string(),
            message: "invalid".to_string(),
            code: Some("E1".to_string()),
        }]
    );
}

#[tokio::test]
async fn test_statuses_map_onto_taxonomy() {
    let cases = [
        (403, ErrorKind::PermissionDenied),
        (404, ErrorKind::NotFound),
        (409, ErrorKind::Conflict),
        (422, ErrorKind::UnprocessableInput),
        (418, ErrorKind::UnexpectedStatus),
    ];

    for (status, kind) in cases {
        let err = error_for(status, json!({"success": false, "message": "nope"})).await;
        assert_eq!(err.kind(), kind, "status {status}");
        assert!(err.to_string().contains("nope"), "status {status}: {err}");
    }
}

#[tokio::test]
async fn test_unprocessable_input_keeps_field_issues() {
    let err = error_for(
        422,
        json!({
            "success": false,
            "message": "Plan cannot be downgraded",
            "errors": [{"field": "planId", "message": "lower tier"}]
        }),
    )
    .await;

    assert_eq!(err.issues().len(), 1);
    assert_eq!(err.issues()[0].code, None);
}

#[tokio::test]
async fn test_login_rejection_is_not_a_session_expiry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "success": false,
            "message": "Invalid email or password"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    // A stale session must survive a failed login attempt
    let (client, session) =
        logged_in_client(&server, &token(15 * 60, "access"), &token(3600, "refresh"));

    let err = client
        .auth()
        .login("ada@example.com", "wrong")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::CredentialsRejected {
            message: "Invalid email or password".to_string()
        }
    );
    assert!(!err.requires_reauthentication());
    assert!(session.snapshot().is_authenticated());
}

#[tokio::test]
async fn test_unsuccessful_envelope_on_2xx() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resource"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Tenant suspended"
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(test_config(&server), Arc::new(Session::in_memory())).unwrap();
    let err = client.get::<Value>("/resource").await.unwrap_err();

    assert_eq!(err, ApiError::InvalidResponse("Tenant suspended".to_string()));
}
