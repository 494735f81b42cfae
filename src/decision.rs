//! The single decision produced for every command.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Approve,
    Deny,
}

/// Which stage finalized the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionSource {
    Policy,
    Sandbox,
    Gatekeeper,
    NoGatekeeper,
}

/// Why a command was denied. Every variant is a policy outcome, never a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    PolicyDenied,
    /// Matched a catastrophic pattern; never sent for review.
    HighRiskBlocked,
    SandboxRejected,
    GatekeeperDenied,
    GatekeeperUnavailable,
    GatekeeperTimeout,
    GatekeeperError,
}

impl DenialKind {
    pub fn source(self) -> DecisionSource {
        match self {
            DenialKind::PolicyDenied | DenialKind::HighRiskBlocked => DecisionSource::Policy,
            DenialKind::SandboxRejected => DecisionSource::Sandbox,
            DenialKind::GatekeeperUnavailable => DecisionSource::NoGatekeeper,
            DenialKind::GatekeeperDenied
            | DenialKind::GatekeeperTimeout
            | DenialKind::GatekeeperError => DecisionSource::Gatekeeper,
        }
    }

    /// Short label shown ahead of the reason in `denial_reason`.
    pub fn label(self) -> &'static str {
        match self {
            DenialKind::PolicyDenied => "Blocklist",
            DenialKind::HighRiskBlocked => "High Risk Blocked",
            DenialKind::SandboxRejected => "Sandbox Violation",
            DenialKind::GatekeeperDenied => "Gatekeeper Denied",
            DenialKind::GatekeeperUnavailable => "No Gatekeeper",
            DenialKind::GatekeeperTimeout => "Gatekeeper Timeout",
            DenialKind::GatekeeperError => "Gatekeeper Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub reason: String,
    pub source: DecisionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialKind>,
}

impl Decision {
    pub fn approve(source: DecisionSource, reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Approve,
            reason: reason.into(),
            source,
            denial: None,
        }
    }

    pub fn deny(kind: DenialKind, reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Deny,
            reason: reason.into(),
            source: kind.source(),
            denial: Some(kind),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.outcome == Outcome::Approve
    }

    /// Caller-facing denial text, `None` for approvals.
    pub fn denial_reason(&self) -> Option<String> {
        self.denial
            .map(|kind| format!("{}: {}", kind.label(), self.reason))
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self.outcome {
            Outcome::Approve => "APPROVE",
            Outcome::Deny => "DENY",
        };
        write!(f, "{} ({:?}): {}", outcome, self.source, self.reason)
    }
}
