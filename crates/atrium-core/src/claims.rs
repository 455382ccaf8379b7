//! Bearer token claims decoding and expiry policy
//!
//! Tokens are decoded without verifying their signature. The result is
//! advisory only: the server remains the authority on whether a token is
//! accepted, and the client only uses the claims to decide when to refresh.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Buffer used before sending a request: tokens expiring within this window
/// are refreshed proactively.
pub const PROACTIVE_REFRESH_BUFFER: Duration = Duration::from_secs(60);

/// Zero buffer, used to check whether a refresh token is already dead.
pub const NO_BUFFER: Duration = Duration::ZERO;

/// Claims carried in a token payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Expiry, in seconds since the Unix epoch
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub exp: Option<i64>,

    /// Issued-at, in seconds since the Unix epoch
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub iat: Option<i64>,

    /// Subject (usually the user id)
    #[serde(default)]
    pub sub: Option<String>,

    /// Any other claims the issuer embedded
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Expiry as a timestamp, if the token carries one
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
    }

    /// Issue time as a timestamp, if the token carries one
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single())
    }
}

/// Numeric dates may be serialized as floats by some issuers.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
        _ => None,
    }))
}

/// Decode the claims of a compact `header.payload.signature` token.
///
/// Returns `None` for anything malformed: wrong segment count, bad base64,
/// or a payload that is not a JSON object.
pub fn decode(token: &str) -> Option<Claims> {
    let mut segments = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let payload = payload.trim_end_matches('=');
    if payload.is_empty() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;

    serde_json::from_slice::<Claims>(&bytes).ok()
}

/// Whether `token` is expired, or will expire within `buffer`.
///
/// Tokens without an `exp` claim, and tokens that cannot be decoded, count
/// as expired.
pub fn is_expired_or_expiring_soon(token: &str, buffer: Duration) -> bool {
    is_expired_or_expiring_soon_at(token, buffer, Utc::now())
}

/// Same as [`is_expired_or_expiring_soon`] against an explicit clock.
pub fn is_expired_or_expiring_soon_at(token: &str, buffer: Duration, now: DateTime<Utc>) -> bool {
    let Some(exp) = decode(token).and_then(|claims| claims.exp) else {
        return true;
    };

    let buffer_ms = i64::try_from(buffer.as_millis()).unwrap_or(i64::MAX);
    let deadline_ms = exp.saturating_mul(1000).saturating_sub(buffer_ms);
    now.timestamp_millis() >= deadline_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mint(payload: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.signature")
    }

    #[test]
    fn test_decode_standard_claims() {
        let token = mint(json!({"exp": 1_700_000_900, "iat": 1_700_000_000, "sub": "user-1", "role": "admin"}));
        let claims = decode(&token).unwrap();

        assert_eq!(claims.exp, Some(1_700_000_900));
        assert_eq!(claims.iat, Some(1_700_000_000));
        assert_eq!(claims.sub.as_deref(), Some("user-1"));
        assert_eq!(claims.extra.get("role"), Some(&json!("admin")));
        assert_eq!(claims.expires_at().unwrap().timestamp(), 1_700_000_900);
    }

    #[test]
    fn test_decode_accepts_float_timestamps() {
        let token = mint(json!({"exp": 1_700_000_900.75}));
        assert_eq!(decode(&token).unwrap().exp, Some(1_700_000_900));
    }

    #[test]
    fn test_decode_accepts_padded_payload() {
        let header = URL_SAFE_NO_PAD.encode(b"{}");
        let body = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":12}"#);
        assert!(body.ends_with("=="));
        let token = format!("{header}.{body}.sig");
        assert_eq!(decode(&token).unwrap().exp, Some(12));
    }

    #[test]
    fn test_decode_malformed_returns_none() {
        assert!(decode("").is_none());
        assert!(decode("not-a-token").is_none());
        assert!(decode("a.b").is_none());
        assert!(decode("a.b.c.d").is_none());
        assert!(decode("header..sig").is_none());
        assert!(decode("header.!!!!.sig").is_none());

        // Valid base64, but not a JSON object
        let not_object = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2,3]"));
        assert!(decode(&not_object).is_none());
    }

    #[test]
    fn test_missing_exp_is_expired() {
        let token = mint(json!({"sub": "user-1"}));
        assert!(is_expired_or_expiring_soon(&token, NO_BUFFER));
        assert!(is_expired_or_expiring_soon("garbage", NO_BUFFER));
    }

    #[test]
    fn test_expiry_respects_buffer() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let token = mint(json!({"exp": 1_700_000_030}));

        // 30s left: fine with no buffer, expiring soon with the proactive buffer
        assert!(!is_expired_or_expiring_soon_at(&token, NO_BUFFER, now));
        assert!(is_expired_or_expiring_soon_at(&token, PROACTIVE_REFRESH_BUFFER, now));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let token = mint(json!({"exp": 1_700_000_000}));
        assert!(is_expired_or_expiring_soon_at(&token, NO_BUFFER, now));

        let token = mint(json!({"exp": 1_700_000_060}));
        assert!(is_expired_or_expiring_soon_at(&token, PROACTIVE_REFRESH_BUFFER, now));
        assert!(!is_expired_or_expiring_soon_at(
            &token,
            Duration::from_secs(59),
            now
        ));
    }

    #[test]
    fn test_freshly_issued_token_is_not_expired() {
        let now = Utc::now().timestamp();
        let token = mint(json!({"iat": now, "exp": now + 900}));
        assert!(!is_expired_or_expiring_soon(&token, NO_BUFFER));
        assert!(!is_expired_or_expiring_soon(&token, PROACTIVE_REFRESH_BUFFER));
    }
}
