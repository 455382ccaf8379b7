//! Client configuration
//!
//! Loaded from a YAML or TOML file (chosen by extension), then overridden by
//! `ATRIUM_*` environment variables. Every field has a default, so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `https://api.example.com/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Whole-request timeout; an expired request fails as a network error
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Backoff retries for network errors and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Access tokens expiring within this window are refreshed before sending
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,

    /// Header carrying the tenant id
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,

    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,

    /// Endpoints whose 401 is a credential rejection rather than an expired session
    #[serde(default = "default_auth_paths")]
    pub auth_paths: Vec<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Where the CLI persists the session
    #[serde(default = "default_session_file")]
    pub session_file: String,

    #[serde(default)]
    pub cookies: CookieConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieConfig {
    /// Set in production so cookies only travel over TLS
    #[serde(default = "default_false")]
    pub secure: bool,

    #[serde(default)]
    pub same_site: SameSite,

    #[serde(default = "default_access_max_age_secs")]
    pub access_max_age_secs: u64,

    #[serde(default = "default_refresh_max_age_secs")]
    pub refresh_max_age_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default = "default_false")]
    pub json: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            refresh_buffer_secs: default_refresh_buffer_secs(),
            tenant_header: default_tenant_header(),
            refresh_path: default_refresh_path(),
            auth_paths: default_auth_paths(),
            user_agent: default_user_agent(),
            session_file: default_session_file(),
            cookies: CookieConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: default_false(),
            same_site: SameSite::default(),
            access_max_age_secs: default_access_max_age_secs(),
            refresh_max_age_secs: default_refresh_max_age_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_false(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3001/api".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_pool_max_idle_per_host() -> usize {
    16
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_refresh_buffer_secs() -> u64 {
    60
}

fn default_tenant_header() -> String {
    "x-tenant-id".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_auth_paths() -> Vec<String> {
    [
        "/auth/login",
        "/auth/register",
        "/auth/forgot-password",
        "/auth/reset-password",
        "/auth/refresh",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_user_agent() -> String {
    format!("Atrium/{}", env!("CARGO_PKG_VERSION"))
}

fn default_session_file() -> String {
    "~/.atrium/session.json".to_string()
}

fn default_access_max_age_secs() -> u64 {
    15 * 60
}

fn default_refresh_max_age_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_false() -> bool {
    false
}

impl ClientConfig {
    /// Load a configuration file, apply environment overrides and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_tilde(path.as_ref())?;
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(&path)?;
        let mut config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str::<Self>(&contents)
                .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?,
            Some("yaml") | Some("yml") => {
                if contents.trim().is_empty() {
                    Self::default()
                } else {
                    serde_yaml::from_str::<Self>(&contents)
                        .map_err(|e| Error::Config(format!("Invalid YAML: {}", e)))?
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "Unsupported config format {:?} for {}",
                    other,
                    path.display()
                )));
            }
        };

        debug!("Loaded client configuration from {}", path.display());
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `ATRIUM_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup("ATRIUM_BASE_URL") {
            self.base_url = base_url;
        }
        if let Some(header) = lookup("ATRIUM_TENANT_HEADER") {
            self.tenant_header = header;
        }
        if let Some(level) = lookup("ATRIUM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(raw) = lookup("ATRIUM_MAX_RETRIES") {
            match raw.parse() {
                Ok(value) => self.max_retries = value,
                Err(e) => warn!("Ignoring ATRIUM_MAX_RETRIES={:?}: {}", raw, e),
            }
        }
        if let Some(raw) = lookup("ATRIUM_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(value) => self.timeout_secs = value,
                Err(e) => warn!("Ignoring ATRIUM_TIMEOUT_SECS={:?}: {}", raw, e),
            }
        }
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(Error::ConfigValidation("base_url is empty".to_string()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::ConfigValidation(format!(
                "base_url must start with http:// or https://, got {:?}",
                base
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::ConfigValidation(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.tenant_header.trim().is_empty() {
            return Err(Error::ConfigValidation("tenant_header is empty".to_string()));
        }
        if !self.refresh_path.starts_with('/') {
            return Err(Error::ConfigValidation(format!(
                "refresh_path must start with '/', got {:?}",
                self.refresh_path
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }

    /// Whether `path` is an authentication endpoint
    pub fn is_auth_path(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
        self.auth_paths
            .iter()
            .any(|auth| auth.trim_end_matches('/') == path)
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| Error::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
