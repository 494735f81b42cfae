//! Gatekeeper adjudication.
//!
//! The gatekeeper escalates risky commands to a single pluggable
//! [`Evaluator`] and turns whatever comes back into a [`Decision`]. It is
//! fail-closed: a timeout, an evaluator error or an answer that is not
//! clearly an approval all resolve to DENY.

pub mod openai;
pub mod prompt;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::context::GatekeeperContext;
use crate::decision::{Decision, DecisionSource, DenialKind};
use crate::security::RiskTier;

pub use openai::{OpenAiEvaluator, ProviderPreset};

/// What the evaluator is asked to judge.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub command: &'a str,
    pub reasoning: &'a str,
    pub tier: RiskTier,
    pub context: &'a GatekeeperContext,
}

/// Raw answer from an evaluator, before the gatekeeper maps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorReply {
    pub decision: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_clarification: Option<String>,
}

impl EvaluatorReply {
    pub fn new(decision: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            decision: decision.into(),
            reason: reason.into(),
            required_clarification: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("authentication failure: {0}")]
    Auth(String),

    #[error("provider rejected request: {0}")]
    Api(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A decision-making backend. One implementation per LLM provider.
#[async_trait]
pub trait Evaluator: Send + Sync + fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn assess(
        &self,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluatorReply, EvaluatorError>;
}

/// Wraps one evaluator behind a timeout and fail-closed mapping.
#[derive(Debug, Clone)]
pub struct Gatekeeper {
    evaluator: Arc<dyn Evaluator>,
}

impl Gatekeeper {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    pub fn evaluator_name(&self) -> &str {
        self.evaluator.name()
    }

    /// Adjudicate a command. Never returns later than `timeout` plus
    /// scheduling overhead, and never approves on error.
    pub async fn assess(
        &self,
        command: &str,
        reasoning: &str,
        tier: RiskTier,
        context: &GatekeeperContext,
        timeout: Duration,
    ) -> Decision {
        if tier.requires_gatekeeper() && reasoning.trim().is_empty() {
            return Decision::deny(
                DenialKind::GatekeeperDenied,
                format!(
                    "Command '{}' is classified as {} but no reasoning was provided",
                    command, tier
                ),
            );
        }

        let request = EvaluationRequest {
            command,
            reasoning,
            tier,
            context,
        };

        info!(
            "Evaluating command via {}: {} (risk: {})",
            self.evaluator.name(),
            command,
            tier
        );

        let decision = match tokio::time::timeout(timeout, self.evaluator.assess(&request)).await {
            Ok(Ok(reply)) => map_reply(reply),
            Ok(Err(e)) => {
                warn!("Evaluator {} failed: {}", self.evaluator.name(), e);
                Decision::deny(DenialKind::GatekeeperError, format!("evaluator error: {}", e))
            }
            Err(_) => {
                warn!(
                    "Evaluator {} timed out after {:?}",
                    self.evaluator.name(),
                    timeout
                );
                Decision::deny(DenialKind::GatekeeperTimeout, "evaluator timeout")
            }
        };

        info!("Gatekeeper decision: {}", decision);
        decision
    }
}

/// Map an evaluator reply onto exactly APPROVE or DENY.
pub fn map_reply(reply: EvaluatorReply) -> Decision {
    match reply.decision.trim().to_ascii_uppercase().as_str() {
        "APPROVE" | "ALLOW" => Decision::approve(DecisionSource::Gatekeeper, reply.reason),
        "DENY" => Decision::deny(DenialKind::GatekeeperDenied, reply.reason),
        "CHALLENGE" => {
            let reason = match reply.required_clarification {
                Some(c) if !c.trim().is_empty() => {
                    format!("clarification required: {} ({})", c.trim(), reply.reason)
                }
                _ => format!("clarification required: {}", reply.reason),
            };
            Decision::deny(DenialKind::GatekeeperDenied, reason)
        }
        other => Decision::deny(
            DenialKind::GatekeeperError,
            format!("unrecognized evaluator decision '{}'", other),
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::decision::Outcome;
    use crate::testing::{FailingEvaluator, ScriptedEvaluator, SlowEvaluator};

    fn ctx() -> GatekeeperContext {
        let mut ctx = GatekeeperContext::new();
        ctx.insert("os".to_string(), "Linux".to_string());
        ctx
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_approve_and_allow_map_to_approve() {
        for word in ["APPROVE", "allow", " Allow "] {
            let gk = Gatekeeper::new(Arc::new(ScriptedEvaluator::new(word, "looks fine")));
            let d = gk.assess("rm a.txt", "cleanup", RiskTier::Yellow, &ctx(), TIMEOUT).await;
            assert_eq!(d.outcome, Outcome::Approve, "word {:?}", word);
            assert_eq!(d.source, DecisionSource::Gatekeeper);
        }
    }

    #[tokio::test]
    async fn test_deny_is_denied() {
        let gk = Gatekeeper::new(Arc::new(ScriptedEvaluator::new("DENY", "destructive")));
        let d = gk.assess("rm -rf x", "cleanup", RiskTier::Red, &ctx(), TIMEOUT).await;
        assert_eq!(d.denial, Some(DenialKind::GatekeeperDenied));
        assert_eq!(d.reason, "destructive");
    }

    #[tokio::test]
    async fn test_ambiguous_answers_are_denied() {
        for word in ["CHALLENGE", "maybe", "", "APPROVE?"] {
            let gk = Gatekeeper::new(Arc::new(ScriptedEvaluator::new(word, "hmm")));
            let d = gk.assess("rm a", "cleanup", RiskTier::Yellow, &ctx(), TIMEOUT).await;
            assert_eq!(d.outcome, Outcome::Deny, "word {:?}", word);
        }
    }

    #[tokio::test]
    async fn test_challenge_carries_clarification() {
        let reply = EvaluatorReply {
            decision: "CHALLENGE".into(),
            reason: "vague".into(),
            required_clarification: Some("which files?".into()),
        };
        let d = map_reply(reply);
        assert!(d.reason.contains("which files?"));
        assert_eq!(d.denial, Some(DenialKind::GatekeeperDenied));
    }

    #[tokio::test]
    async fn test_evaluator_error_fails_closed() {
        let gk = Gatekeeper::new(Arc::new(FailingEvaluator::auth()));
        let d = gk.assess("curl x", "fetch", RiskTier::Yellow, &ctx(), TIMEOUT).await;
        assert_eq!(d.denial, Some(DenialKind::GatekeeperError));
        assert!(d.reason.contains("authentication failure"));
    }

    #[tokio::test]
    async fn test_timeout_fails_closed_and_is_bounded() {
        let slow = Arc::new(SlowEvaluator::new(Duration::from_secs(30)));
        let gk = Gatekeeper::new(slow.clone());

        let started = Instant::now();
        let d = gk
            .assess("curl x", "fetch", RiskTier::Yellow, &ctx(), Duration::from_millis(50))
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(d.denial, Some(DenialKind::GatekeeperTimeout));
        assert_eq!(d.reason, "evaluator timeout");
        // The losing evaluator future was dropped, not left running.
        assert_eq!(slow.completed(), 0);
    }

    #[tokio::test]
    async fn test_missing_reasoning_skips_evaluator() {
        let eval = Arc::new(ScriptedEvaluator::new("APPROVE", "ok"));
        let gk = Gatekeeper::new(eval.clone());
        let d = gk.assess("rm a", "  ", RiskTier::Yellow, &ctx(), TIMEOUT).await;
        assert_eq!(d.outcome, Outcome::Deny);
        assert!(d.reason.contains("no reasoning"));
        assert_eq!(eval.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_is_forwarded_verbatim() {
        let eval = Arc::new(ScriptedEvaluator::new("APPROVE", "ok"));
        let gk = Gatekeeper::new(eval.clone());
        gk.assess("git push", "ship release", RiskTier::Yellow, &ctx(), TIMEOUT)
            .await;

        let seen = eval.last_request().unwrap();
        assert_eq!(seen.command, "git push");
        assert_eq!(seen.reasoning, "ship release");
        assert_eq!(seen.tier, RiskTier::Yellow);
        assert_eq!(seen.context, ctx());
    }
}
