//! Error types for Atrium Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    // Credential store errors
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
