//! Error taxonomy: transient external failures are counted and logged, never
//! propagated to the control loop; configuration errors fail fast at startup.

use thiserror::Error;

/// Transient failure polling an ingest server. Counted via
/// [`crate::ingest::IngestPoller`]'s failure counter; the loop continues.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported ingest server type: {0}")]
    UnsupportedServerType(String),
}

/// Configuration invalid at startup — the only error class that halts the
/// process (exit code 1).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("insecure production defaults detected: {0}")]
    InsecureDefaults(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}
