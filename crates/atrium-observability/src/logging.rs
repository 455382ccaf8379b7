//! Structured logging setup

use atrium_core::config::LoggingConfig;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Libraries whose debug output drowns the client's own logs
const NOISY_TARGETS: &[&str] = &["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"];

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to install global subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Map a configured level name onto a tracing level, defaulting to INFO
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Build the filter: `RUST_LOG` wins when set, otherwise the configured
/// level with HTTP internals capped at WARN
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut filter = EnvFilter::new(parse_level(&config.level).to_string());
    for target in NOISY_TARGETS {
        match target.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => tracing::warn!("Failed to set {} log filter: {}", target, e),
        }
    }
    filter
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config);
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}
