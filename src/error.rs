//! Error types shared across the crate.
//!
//! Policy outcomes (blocklist hits, sandbox rejections, gatekeeper denials)
//! are *not* errors: they come back as an [`ExecutionResult`] with
//! `success == false`. The types here cover configuration mistakes and the
//! infrastructure failures that abort a request.
//!
//! [`ExecutionResult`]: crate::pipeline::ExecutionResult

use std::time::Duration;

use thiserror::Error;

/// Errors raised while building the pipeline from settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unknown template: {name}. Available: {available}")]
    UnknownTemplate { name: String, available: String },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to initialize evaluator: {0}")]
    Evaluator(String),
}

/// Errors from the audit logger.
#[derive(Error, Debug)]
pub enum AuditError {
    /// The queue stayed full for longer than the configured wait.
    #[error("audit queue full for {waited:?}; record not accepted")]
    BackpressureExceeded { waited: Duration },

    /// The logger was shut down, or its writer died.
    #[error("audit logger is closed")]
    Closed,

    #[error("failed to open audit store {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn audit writer: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Infrastructure failures that abort a pipeline call.
///
/// Anything here means the request produced no trustworthy result; callers
/// must not treat it as either an approval or a denial.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("audit trail unavailable: {0}")]
    Audit(#[from] AuditError),

    #[error("pipeline is shutting down")]
    ShuttingDown,

    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// True when the audit queue refused the record because it stayed full.
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            PipelineError::Audit(AuditError::BackpressureExceeded { .. })
        )
    }
}
