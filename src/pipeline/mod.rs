//! The decision pipeline.
//!
//! Each call to [`ExecutionPipeline::execute`] walks one command through
//!
//! ```text
//! START -> BLOCKED | ALLOWLISTED -> SANDBOX_CHECK -> CLASSIFY
//!       -> GATEKEEPER_SKIPPED | GATEKEEPER_CALL -> APPROVED | DENIED
//!       -> EXECUTE (approved only) -> RESULT
//! ```
//!
//! and ends with exactly one audit record and one [`ExecutionResult`]. The
//! pure stages share immutable state; the gatekeeper call and the command
//! run are the only places that wait, and both race against cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, Notify};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditLogger, AuditRecord, ResultSummary, WriterStats};
use crate::config::Settings;
use crate::context::{self, GatekeeperContext};
use crate::decision::{Decision, DecisionSource, DenialKind};
use crate::error::{ConfigError, PipelineError};
use crate::gatekeeper::{Evaluator, Gatekeeper};
use crate::security::{
    Command, PolicyList, PolicyMatch, RiskClassifier, RiskTier, SandboxConfig, SandboxValidator,
    SandboxVerdict,
};
use crate::shell::{CommandRunner, RunOutput};
use crate::utils::context::Context;

/// What the caller gets back for every command that entered the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub risk_tier: RiskTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Bound on both the gatekeeper call and the command run.
    pub timeout: Duration,
    pub max_output_bytes: usize,
    /// Trace stage transitions. Never changes a decision.
    pub debug_mode: bool,
    pub os_info: String,
    pub environment: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_output_bytes: 1_000_000,
            debug_mode: false,
            os_info: context::detect_os(),
            environment: "production".to_string(),
        }
    }
}

impl From<&Settings> for PipelineOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            timeout: settings.timeout(),
            max_output_bytes: settings.max_output_bytes,
            debug_mode: settings.debug_mode,
            os_info: settings.os_info(),
            environment: settings.environment.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Start,
    Blocked,
    Allowlisted,
    SandboxCheck,
    SandboxRejected,
    Classify,
    GatekeeperSkipped,
    GatekeeperCall,
    Approved,
    Denied,
    Execute,
    Result,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "START",
            Stage::Blocked => "BLOCKED",
            Stage::Allowlisted => "ALLOWLISTED",
            Stage::SandboxCheck => "SANDBOX_CHECK",
            Stage::SandboxRejected => "SANDBOX_REJECTED",
            Stage::Classify => "CLASSIFY",
            Stage::GatekeeperSkipped => "GATEKEEPER_SKIPPED",
            Stage::GatekeeperCall => "GATEKEEPER_CALL",
            Stage::Approved => "APPROVED",
            Stage::Denied => "DENIED",
            Stage::Execute => "EXECUTE",
            Stage::Result => "RESULT",
        }
    }
}

/// Fires when the caller drops its `execute` future or the pipeline shuts down.
struct CancelSignal {
    caller: oneshot::Receiver<()>,
    shutdown: watch::Receiver<bool>,
    fired: Option<&'static str>,
}

impl CancelSignal {
    async fn cancelled(&mut self) -> &'static str {
        if let Some(why) = self.fired {
            return why;
        }
        let why = tokio::select! {
            _ = &mut self.caller => "caller abandoned the request",
            _ = shutdown_requested(&mut self.shutdown) => "pipeline shutting down",
        };
        self.fired = Some(why);
        why
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender lives as long as the pipeline; never fire on teardown.
            std::future::pending::<()>().await;
        }
    }
}

enum RunOutcome {
    Finished(RunOutput),
    Failed(String),
}

struct Inner {
    policy: PolicyList,
    classifier: RiskClassifier,
    sandbox: SandboxValidator,
    gatekeeper: Option<Gatekeeper>,
    runner: Arc<dyn CommandRunner>,
    audit: Arc<AuditLogger>,
    options: PipelineOptions,

    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    cancel: watch::Sender<bool>,
}

/// Runs commands through policy, sandbox, classifier and gatekeeper.
///
/// Cloning is cheap and clones share everything, including the audit logger.
#[derive(Clone)]
pub struct ExecutionPipeline {
    inner: Arc<Inner>,
}

impl fmt::Debug for ExecutionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPipeline")
            .field("gatekeeper", &self.inner.gatekeeper)
            .field("options", &self.inner.options)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

pub struct PipelineBuilder {
    runner: Arc<dyn CommandRunner>,
    audit: Arc<AuditLogger>,
    policy: PolicyList,
    classifier: Option<RiskClassifier>,
    sandbox: Option<SandboxValidator>,
    gatekeeper: Option<Gatekeeper>,
    options: PipelineOptions,
}

impl PipelineBuilder {
    pub fn policy(mut self, policy: PolicyList) -> Self {
        self.policy = policy;
        self
    }

    pub fn classifier(mut self, classifier: RiskClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn sandbox(mut self, sandbox: SandboxValidator) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn evaluator(mut self, evaluator: Option<Arc<dyn Evaluator>>) -> Self {
        self.gatekeeper = evaluator.map(Gatekeeper::new);
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<ExecutionPipeline, ConfigError> {
        let classifier = match self.classifier {
            Some(c) => c,
            None => RiskClassifier::new(RiskTier::Yellow)?,
        };
        let sandbox = self
            .sandbox
            .unwrap_or_else(|| SandboxValidator::new(&SandboxConfig::default()));

        match &self.gatekeeper {
            Some(gk) => info!("Pipeline ready with {} gatekeeper", gk.evaluator_name()),
            None => warn!("Pipeline has no gatekeeper; risky commands will be denied"),
        }

        let (cancel, _) = watch::channel(false);
        Ok(ExecutionPipeline {
            inner: Arc::new(Inner {
                policy: self.policy,
                classifier,
                sandbox,
                gatekeeper: self.gatekeeper,
                runner: self.runner,
                audit: self.audit,
                options: self.options,
                accepting: AtomicBool::new(true),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                cancel,
            }),
        })
    }
}

impl ExecutionPipeline {
    pub fn builder(runner: Arc<dyn CommandRunner>, audit: Arc<AuditLogger>) -> PipelineBuilder {
        PipelineBuilder {
            runner,
            audit,
            policy: PolicyList::default(),
            classifier: None,
            sandbox: None,
            gatekeeper: None,
            options: PipelineOptions::default(),
        }
    }

    /// Assemble a pipeline from settings.
    pub fn from_settings(
        settings: &Settings,
        runner: Arc<dyn CommandRunner>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, ConfigError> {
        Self::builder(runner, audit)
            .policy(settings.policy_list()?)
            .classifier(settings.classifier()?)
            .sandbox(settings.sandbox_validator())
            .evaluator(settings.evaluator()?)
            .options(PipelineOptions::from(settings))
            .build()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Run one command through the pipeline.
    ///
    /// Policy outcomes come back as `Ok` with `success == false`. `Err` means
    /// the request could not be audited (or the pipeline is shutting down)
    /// and must be treated as neither approved nor denied.
    ///
    /// Dropping the returned future cancels the request; it is still
    /// decided (as denied) and audited in the background.
    pub async fn execute(
        &self,
        command: Command,
        context: GatekeeperContext,
    ) -> Result<ExecutionResult, PipelineError> {
        // Count first, then check, so shutdown never misses a request.
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = {
            let inner = Arc::clone(&self.inner);
            Context::with(move || inner.leave())
        };
        if !self.inner.accepting.load(Ordering::SeqCst) {
            drop(in_flight);
            return Err(PipelineError::ShuttingDown);
        }

        let (caller_alive, caller) = oneshot::channel::<()>();
        let cancel = CancelSignal {
            caller,
            shutdown: self.inner.cancel.subscribe(),
            fired: None,
        };

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _in_flight = in_flight;
            inner.process(command, context, cancel).await
        });

        let joined = task.await;
        drop(caller_alive);
        joined.map_err(|e| PipelineError::Task(e.to_string()))?
    }

    /// Two-phase shutdown.
    ///
    /// New requests are refused immediately. In-flight requests get `grace`
    /// to finish; after that their pending gatekeeper calls and commands are
    /// cancelled and recorded as denied. Finally the audit logger is drained
    /// and closed.
    pub async fn shutdown(&self, grace: Duration) -> Result<WriterStats, PipelineError> {
        self.inner.accepting.store(false, Ordering::SeqCst);
        info!(
            "Pipeline shutting down ({} in flight, grace {:?})",
            self.in_flight(),
            grace
        );

        if tokio::time::timeout(grace, self.inner.wait_idle()).await.is_err() {
            warn!(
                "{} requests still in flight after {:?}, cancelling",
                self.in_flight(),
                grace
            );
            self.inner.cancel.send_replace(true);
            self.inner.wait_idle().await;
        }

        Ok(self.inner.audit.shutdown().await?)
    }
}

impl Inner {
    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn trace(&self, stage: Stage, detail: impl fmt::Display) {
        if self.options.debug_mode {
            debug!("[{}] {}", stage.as_str(), detail);
        }
    }

    async fn process(
        &self,
        command: Command,
        overrides: GatekeeperContext,
        mut cancel: CancelSignal,
    ) -> Result<ExecutionResult, PipelineError> {
        let started = Instant::now();
        let context = context::capture(&self.options.os_info, &self.options.environment, &overrides);
        self.trace(Stage::Start, &command.text);

        let (tier, decision) = self.decide(&command, &context, &mut cancel).await;
        let decided_at = Utc::now();

        let outcome = if decision.is_approved() {
            self.trace(Stage::Approved, &decision);
            self.trace(Stage::Execute, &command.text);
            Some(self.run(&command.text, &mut cancel).await)
        } else {
            self.trace(Stage::Denied, &decision);
            None
        };

        let (result, summary) = finish(tier, &decision, outcome, started.elapsed());
        self.trace(Stage::Result, format_args!("success={}", result.success));

        if self.options.debug_mode {
            info!(
                "Decision summary: command={:?} tier={} decision={} success={}",
                command.text, tier, decision, result.success
            );
        }

        let record = AuditRecord {
            sequence_number: 0,
            timestamp: decided_at,
            command: command.text,
            reasoning: command.reasoning,
            context,
            tier,
            decision,
            result: summary,
        };

        match self.audit.log(record).await {
            Ok(seq) => {
                debug!("Audit record {} queued", seq);
                Ok(result)
            }
            Err(e) => {
                error!("Request aborted, audit record not accepted: {}", e);
                Err(e.into())
            }
        }
    }

    async fn decide(
        &self,
        command: &Command,
        context: &GatekeeperContext,
        cancel: &mut CancelSignal,
    ) -> (RiskTier, Decision) {
        let text = command.text.as_str();

        match self.policy.evaluate(text) {
            PolicyMatch::Blocked(pattern) => {
                self.trace(Stage::Blocked, &pattern);
                let decision = Decision::deny(
                    DenialKind::PolicyDenied,
                    format!("command matches blocklist pattern '{}'", pattern),
                );
                return (self.classifier.classify(text), decision);
            }
            PolicyMatch::Allowed(pattern) => {
                self.trace(Stage::Allowlisted, &pattern);
                if self.sandbox.checks_allowlisted() {
                    if let Some(denial) = self.sandbox_check(text) {
                        return (RiskTier::Green, denial);
                    }
                }
                let decision = Decision::approve(
                    DecisionSource::Policy,
                    format!("command matches allowlist pattern '{}'", pattern),
                );
                return (RiskTier::Green, decision);
            }
            PolicyMatch::Unmatched => {}
        }

        if let Some(denial) = self.sandbox_check(text) {
            return (self.classifier.classify(text), denial);
        }

        if let Some(pattern) = self.classifier.catastrophic(text) {
            self.trace(Stage::Blocked, pattern);
            let decision = Decision::deny(
                DenialKind::HighRiskBlocked,
                format!("command matches catastrophic pattern '{}'", pattern),
            );
            return (RiskTier::Red, decision);
        }

        let (tier, rule) = self.classifier.describe(text);
        self.trace(
            Stage::Classify,
            format_args!("{} ({})", tier, rule.unwrap_or("default tier")),
        );

        if !tier.requires_gatekeeper() {
            self.trace(Stage::GatekeeperSkipped, tier);
            let decision = Decision::approve(
                DecisionSource::Policy,
                format!("{} tier does not require review", tier),
            );
            return (tier, decision);
        }

        let Some(gatekeeper) = &self.gatekeeper else {
            let decision = Decision::deny(
                DenialKind::GatekeeperUnavailable,
                format!("no gatekeeper configured to review {} command", tier),
            );
            return (tier, decision);
        };

        self.trace(Stage::GatekeeperCall, gatekeeper.evaluator_name());
        let decision = tokio::select! {
            decision = gatekeeper.assess(
                text,
                &command.reasoning,
                tier,
                context,
                self.options.timeout,
            ) => decision,
            why = cancel.cancelled() => {
                warn!("Gatekeeper call cancelled ({}): {}", why, text);
                Decision::deny(DenialKind::GatekeeperTimeout, format!("cancelled: {}", why))
            }
        };
        (tier, decision)
    }

    fn sandbox_check(&self, text: &str) -> Option<Decision> {
        self.trace(Stage::SandboxCheck, text);
        match self.sandbox.validate(text) {
            SandboxVerdict::Ok => None,
            SandboxVerdict::Rejected(reason) => {
                self.trace(Stage::SandboxRejected, &reason);
                Some(Decision::deny(DenialKind::SandboxRejected, reason))
            }
        }
    }

    async fn run(&self, text: &str, cancel: &mut CancelSignal) -> RunOutcome {
        tokio::select! {
            output = self.runner.run(text, self.options.timeout, self.options.max_output_bytes) => {
                match output {
                    Ok(output) => RunOutcome::Finished(output),
                    Err(e) => {
                        warn!("Command failed to run: {}", e);
                        RunOutcome::Failed(e.to_string())
                    }
                }
            }
            why = cancel.cancelled() => {
                warn!("Command cancelled ({}): {}", why, text);
                RunOutcome::Failed(format!("command cancelled: {}", why))
            }
        }
    }
}

/// Build the caller-facing result and the audit summary for one request.
fn finish(
    tier: RiskTier,
    decision: &Decision,
    outcome: Option<RunOutcome>,
    elapsed: Duration,
) -> (ExecutionResult, ResultSummary) {
    let duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

    match outcome {
        None => {
            let denial_reason = decision.denial_reason();
            (
                ExecutionResult {
                    success: false,
                    risk_tier: tier,
                    denial_reason: denial_reason.clone(),
                    stdout: None,
                    stderr: None,
                    exit_code: None,
                },
                ResultSummary {
                    success: false,
                    denial_reason,
                    exit_code: None,
                    stdout_bytes: 0,
                    stderr_bytes: 0,
                    truncated: false,
                    duration_ms,
                },
            )
        }
        Some(RunOutcome::Finished(output)) => (
            ExecutionResult {
                success: output.success(),
                risk_tier: tier,
                denial_reason: None,
                stdout: Some(String::from_utf8_lossy(&output.stdout).into_owned()),
                stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
                exit_code: Some(output.exit_code),
            },
            ResultSummary {
                success: output.success(),
                denial_reason: None,
                exit_code: Some(output.exit_code),
                stdout_bytes: output.stdout.len(),
                stderr_bytes: output.stderr.len(),
                truncated: output.truncated,
                duration_ms,
            },
        ),
        Some(RunOutcome::Failed(message)) => (
            ExecutionResult {
                success: false,
                risk_tier: tier,
                denial_reason: None,
                stdout: None,
                stderr: Some(message.clone()),
                exit_code: None,
            },
            ResultSummary {
                success: false,
                denial_reason: None,
                exit_code: None,
                stdout_bytes: 0,
                stderr_bytes: message.len(),
                truncated: false,
                duration_ms,
            },
        ),
    }
}
