//! Command execution.
//!
//! The pipeline only talks to the [`CommandRunner`] trait and only after a
//! final approval. [`ShellRunner`] is the default implementation backed by
//! `tokio::process`.

mod runner;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use runner::ShellRunner;

/// Captured outcome of a finished (or timed out) process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
    /// Whether stdout or stderr hit the byte cap.
    pub truncated: bool,
    pub duration: Duration,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("i/o error while running command: {0}")]
    Io(#[source] std::io::Error),
}

/// Runs an approved command.
#[async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    async fn run(
        &self,
        command: &str,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<RunOutput, RunError>;
}
