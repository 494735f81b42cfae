//! ShellGate - gatekeeping for agent-proposed shell commands
//!
//! Every command goes through a fixed pipeline before anything runs:
//! - allow/deny policy lists
//! - a syntactic sandbox check
//! - a rule-based risk classifier
//! - for risky commands, an LLM gatekeeper that must explicitly approve
//!
//! Each decision is written to an ordered, append-only audit trail before the
//! caller sees the result.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shellgate::audit::{AuditLogger, JsonlSink};
//! use shellgate::config::Settings;
//! use shellgate::context::GatekeeperContext;
//! use shellgate::pipeline::ExecutionPipeline;
//! use shellgate::security::Command;
//! use shellgate::shell::ShellRunner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let sink = JsonlSink::open(&settings.audit_log_path, 0, 0)?;
//!     let audit = Arc::new(AuditLogger::start(Box::new(sink), settings.audit_config())?);
//!     let runner = Arc::new(ShellRunner::new("."));
//!
//!     let pipeline = ExecutionPipeline::from_settings(&settings, runner, audit)?;
//!     let result = pipeline
//!         .execute(Command::new("ls -la", "inspect the project"), GatekeeperContext::new())
//!         .await?;
//!     println!("{}", serde_json::to_string(&result)?);
//!
//!     pipeline.shutdown(settings.shutdown_grace()).await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod gatekeeper;
pub mod pipeline;
pub mod security;
pub mod shell;
pub mod tool;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use audit::{AuditLogger, AuditRecord};
pub use config::Settings;
pub use decision::{Decision, DecisionSource, DenialKind};
pub use error::{AuditError, ConfigError, PipelineError};
pub use gatekeeper::{Evaluator, Gatekeeper};
pub use pipeline::{ExecutionPipeline, ExecutionResult};
pub use security::{Command, RiskTier};
