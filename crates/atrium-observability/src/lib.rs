//! Atrium Observability
//!
//! This crate provides:
//! - Structured logging setup (tracing-subscriber)
//! - Prometheus metrics fed by the client's observer hooks

pub mod logging;
pub mod metrics;

pub use logging::{LoggingError, init_logging};
pub use metrics::ClientMetrics;
