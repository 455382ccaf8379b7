//! Credential persistence
//!
//! A [`Session`](crate::session::Session) writes through to one or more
//! [`CredentialStore`]s. The first store is the primary copy the session can be
//! restored from; the others are mirrors (for example the cookie copy read by
//! the web middleware). Clearing a session clears every store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{CookieConfig, SameSite};
use crate::tenant::TenantId;
use crate::{Error, Result};

/// Fixed storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Fixed storage key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Access/refresh token pair issued at login
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(token: &str) -> String {
    format!("<{} chars>", token.len())
}

/// Everything a session persists
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

impl PersistedSession {
    /// True when no credential or tenant is held
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.tenant_id.is_none()
    }
}

impl fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedSession")
            .field("access_token", &self.access_token.as_deref().map(redact))
            .field("refresh_token", &self.refresh_token.as_deref().map(redact))
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// A place where session credentials are persisted.
///
/// All operations are synchronous. `clear` must be idempotent.
pub trait CredentialStore: Send + Sync + fmt::Debug {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Read back the persisted state, if any
    fn load(&self) -> Result<Option<PersistedSession>>;

    /// Replace the persisted state
    fn save(&self, state: &PersistedSession) -> Result<()>;

    /// Remove every persisted trace of the session
    fn clear(&self) -> Result<()>;
}

/// Process-local store, mostly useful for tests and short-lived tools
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Option<PersistedSession>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Result<Option<PersistedSession>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, state: &PersistedSession) -> Result<()> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}

/// JSON file store keyed by `accessToken` / `refreshToken` / `tenantId`
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Create a store backed by `path` (supports `~` for the home directory)
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            path: crate::config::expand_tilde(path.as_ref())?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load(&self) -> Result<Option<PersistedSession>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let state: PersistedSession = serde_json::from_str(&contents).map_err(|e| {
            Error::CredentialStore(format!(
                "Failed to parse credential file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(if state.is_empty() { None } else { Some(state) })
    }

    fn save(&self, state: &PersistedSession) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        // Write to a sibling file and rename so readers never see a partial file
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;

        debug!("Persisted credentials to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for path in [self.path.clone(), self.path.with_extension("tmp")] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed credential file {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct MirroredCookie {
    value: String,
    max_age: Duration,
    set_at: Instant,
}

impl MirroredCookie {
    fn is_live(&self) -> bool {
        self.set_at.elapsed() < self.max_age
    }
}

/// Cookie copy of the credentials, read by the web middleware.
///
/// Cookies carry `Path=/`, a `Max-Age` matching each token's nominal
/// lifetime, `SameSite` from the config and `Secure` when enabled.
#[derive(Debug)]
pub struct CookieMirror {
    config: CookieConfig,
    cookies: Mutex<BTreeMap<&'static str, MirroredCookie>>,
}

impl CookieMirror {
    pub fn new(config: CookieConfig) -> Self {
        Self {
            config,
            cookies: Mutex::new(BTreeMap::new()),
        }
    }

    fn max_age_for(&self, name: &str) -> Duration {
        if name == ACCESS_TOKEN_KEY {
            Duration::from_secs(self.config.access_max_age_secs)
        } else {
            Duration::from_secs(self.config.refresh_max_age_secs)
        }
    }

    fn set(&self, cookies: &mut BTreeMap<&'static str, MirroredCookie>, name: &'static str, value: Option<&str>) {
        match value {
            Some(value) => {
                cookies.insert(
                    name,
                    MirroredCookie {
                        value: value.to_string(),
                        max_age: self.max_age_for(name),
                        set_at: Instant::now(),
                    },
                );
            }
            None => {
                cookies.remove(name);
            }
        }
    }

    /// `Set-Cookie` header values for every live cookie
    pub fn set_cookie_headers(&self) -> Vec<String> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies
            .iter()
            .filter(|(_, cookie)| cookie.is_live())
            .map(|(name, cookie)| {
                let mut header = format!(
                    "{}={}; Path=/; Max-Age={}",
                    name,
                    cookie.value,
                    cookie.max_age.as_secs()
                );
                header.push_str(match self.config.same_site {
                    SameSite::Lax => "; SameSite=Lax",
                    SameSite::Strict => "; SameSite=Strict",
                    SameSite::None => "; SameSite=None",
                });
                if self.config.secure {
                    header.push_str("; Secure");
                }
                header
            })
            .collect()
    }

    /// `Cookie` request header value, or `None` when no cookie is live
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|(_, cookie)| cookie.is_live())
            .map(|(name, cookie)| format!("{}={}", name, cookie.value))
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

impl CredentialStore for CookieMirror {
    fn name(&self) -> &'static str {
        "cookies"
    }

    fn load(&self) -> Result<Option<PersistedSession>> {
        let cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        let live = |name: &str| {
            cookies
                .get(name)
                .filter(|cookie| cookie.is_live())
                .map(|cookie| cookie.value.clone())
        };

        let state = PersistedSession {
            access_token: live(ACCESS_TOKEN_KEY),
            refresh_token: live(REFRESH_TOKEN_KEY),
            tenant_id: None,
        };
        Ok(if state.is_empty() { None } else { Some(state) })
    }

    fn save(&self, state: &PersistedSession) -> Result<()> {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        self.set(&mut cookies, ACCESS_TOKEN_KEY, state.access_token.as_deref());
        self.set(&mut cookies, REFRESH_TOKEN_KEY, state.refresh_token.as_deref());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.cookies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> PersistedSession {
        PersistedSession {
            access_token: Some("access".to_string()),
            refresh_token: Some("refresh".to_string()),
            tenant_id: Some(TenantId::from_string("acme").unwrap()),
        }
    }

    #[test]
    fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample()));

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_uses_fixed_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp_dir.path().join("session.json")).unwrap();

        store.save(&sample()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["accessToken"], "access");
        assert_eq!(raw["refreshToken"], "refresh");
        assert_eq!(raw["tenantId"], "acme");
        assert_eq!(store.load().unwrap(), Some(sample()));
    }

    #[test]
    fn test_file_store_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store =
            FileCredentialStore::new(temp_dir.path().join("nested/dir/session.json")).unwrap();
        store.save(&sample()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_file_store_clear_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp_dir.path().join("session.json")).unwrap();
        store.save(&sample()).unwrap();

        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();

        let store = FileCredentialStore::new(&path).unwrap();
        assert!(matches!(store.load(), Err(Error::CredentialStore(_))));
    }

    #[test]
    fn test_cookie_mirror_attributes() {
        let mirror = CookieMirror::new(CookieConfig {
            secure: true,
            same_site: SameSite::Lax,
            access_max_age_secs: 900,
            refresh_max_age_secs: 604_800,
        });
        mirror.save(&sample()).unwrap();

        let headers = mirror.set_cookie_headers();
        assert_eq!(
            headers,
            vec![
                "accessToken=access; Path=/; Max-Age=900; SameSite=Lax; Secure".to_string(),
                "refreshToken=refresh; Path=/; Max-Age=604800; SameSite=Lax; Secure".to_string(),
            ]
        );
        assert_eq!(
            mirror.cookie_header().as_deref(),
            Some("accessToken=access; refreshToken=refresh")
        );
    }

    #[test]
    fn test_cookie_mirror_insecure_in_dev() {
        let mirror = CookieMirror::new(CookieConfig::default());
        mirror.save(&sample()).unwrap();
        assert!(mirror.set_cookie_headers().iter().all(|h| !h.contains("Secure")));
    }

    #[test]
    fn test_cookie_mirror_expired_cookies_are_dropped() {
        let mirror = CookieMirror::new(CookieConfig {
            access_max_age_secs: 0,
            ..CookieConfig::default()
        });
        mirror.save(&sample()).unwrap();

        let loaded = mirror.load().unwrap().unwrap();
        assert!(loaded.access_token.is_none());
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(mirror.cookie_header().as_deref(), Some("refreshToken=refresh"));
    }

    #[test]
    fn test_cookie_mirror_clear() {
        let mirror = CookieMirror::new(CookieConfig::default());
        mirror.save(&sample()).unwrap();
        mirror.clear().unwrap();
        mirror.clear().unwrap();

        assert!(mirror.load().unwrap().is_none());
        assert!(mirror.cookie_header().is_none());
        assert!(mirror.set_cookie_headers().is_empty());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = Credentials::new("secret-access", "secret-refresh");
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<13 chars>"));
    }
}
