//! Security module for command analysis and safety checks.
//!
//! This module provides the three pure stages of the decision pipeline:
//! risk classification, allow/deny policy lists and the syntactic sandbox.
//! None of them perform I/O, and all of them are safe to share across
//! concurrently running pipelines.

pub mod classifier;
pub mod policy;
pub mod sandbox;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use classifier::{RiskClassifier, RiskRule};
pub use policy::{PolicyList, PolicyMatch};
pub use sandbox::{SandboxConfig, SandboxValidator, SandboxVerdict};

/// Coarse severity of a proposed command.
///
/// The ordering is used for display and tie-breaks only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    /// Read-only or low-impact.
    Green,
    /// Mutating but recoverable.
    Yellow,
    /// Destructive, irreversible or privileged.
    Red,
}

impl RiskTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskTier::Green => "GREEN",
            RiskTier::Yellow => "YELLOW",
            RiskTier::Red => "RED",
        }
    }

    /// Whether a command of this tier must be adjudicated by the gatekeeper.
    pub fn requires_gatekeeper(self) -> bool {
        self >= RiskTier::Yellow
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GREEN" => Ok(RiskTier::Green),
            "YELLOW" => Ok(RiskTier::Yellow),
            "RED" => Ok(RiskTier::Red),
            other => Err(format!("unknown risk tier '{}'", other)),
        }
    }
}

/// A command proposed by an agent, with the agent's justification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub text: String,
    pub reasoning: String,
}

impl Command {
    pub fn new(text: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reasoning: reasoning.into(),
        }
    }
}
