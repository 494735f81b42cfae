//! Test doubles shared by the unit tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::audit::{AuditRecord, AuditSink};
use crate::context::GatekeeperContext;
use crate::gatekeeper::{EvaluationRequest, Evaluator, EvaluatorError, EvaluatorReply};
use crate::security::RiskTier;
use crate::shell::{CommandRunner, RunError, RunOutput};

/// Owned copy of an [`EvaluationRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub command: String,
    pub reasoning: String,
    pub tier: RiskTier,
    pub context: GatekeeperContext,
}

/// Always answers with the same decision word.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    reply: EvaluatorReply,
    calls: AtomicUsize,
    last: Mutex<Option<SeenRequest>>,
}

impl ScriptedEvaluator {
    pub fn new(decision: &str, reason: &str) -> Self {
        Self {
            reply: EvaluatorReply::new(decision, reason),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<SeenRequest> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn assess(
        &self,
        request: &EvaluationRequest<'_>,
    ) -> Result<EvaluatorReply, EvaluatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(SeenRequest {
            command: request.command.to_string(),
            reasoning: request.reasoning.to_string(),
            tier: request.tier,
            context: request.context.clone(),
        });
        Ok(self.reply.clone())
    }
}

/// Sleeps before approving; counts only the calls that ran to completion.
#[derive(Debug)]
pub struct SlowEvaluator {
    delay: Duration,
    started: AtomicUsize,
    completed: AtomicUsize,
}

impl SlowEvaluator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for SlowEvaluator {
    fn name(&self) -> &str {
        "slow"
    }

    async fn assess(
        &self,
        _request: &EvaluationRequest<'_>,
    ) -> Result<EvaluatorReply, EvaluatorError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(EvaluatorReply::new("APPROVE", "eventually"))
    }
}

#[derive(Debug)]
pub struct FailingEvaluator {
    error: fn() -> EvaluatorError,
}

impl FailingEvaluator {
    pub fn auth() -> Self {
        Self {
            error: || EvaluatorError::Auth("invalid api key".to_string()),
        }
    }

    pub fn transport() -> Self {
        Self {
            error: || EvaluatorError::Transport("connection refused".to_string()),
        }
    }
}

#[async_trait]
impl Evaluator for FailingEvaluator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn assess(
        &self,
        _request: &EvaluationRequest<'_>,
    ) -> Result<EvaluatorReply, EvaluatorError> {
        Err((self.error)())
    }
}

/// Records commands instead of running them.
#[derive(Debug, Default)]
pub struct FakeRunner {
    exit_code: i32,
    delay: Option<Duration>,
    commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exiting(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    pub fn sleeping(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        command: &str,
        _timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<RunOutput, RunError> {
        self.commands.lock().unwrap().push(command.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut stdout = format!("ran: {}\n", command).into_bytes();
        let truncated = stdout.len() > max_output_bytes;
        stdout.truncate(max_output_bytes);

        Ok(RunOutput {
            exit_code: self.exit_code,
            stdout,
            stderr: Vec::new(),
            timed_out: false,
            truncated,
            duration: Duration::from_millis(1),
        })
    }
}

/// Keeps records in memory behind a shared handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    flushed: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushed.load(Ordering::SeqCst)
    }
}

impl AuditSink for MemorySink {
    fn append(&mut self, record: &AuditRecord) -> io::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A sink whose writer blocks until [`Gate::open`] is called.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

#[derive(Debug)]
pub struct StallingSink {
    gate: Gate,
    inner: MemorySink,
}

impl StallingSink {
    pub fn new(gate: Gate, inner: MemorySink) -> Self {
        Self { gate, inner }
    }
}

impl AuditSink for StallingSink {
    fn append(&mut self, record: &AuditRecord) -> io::Result<()> {
        self.gate.wait();
        self.inner.append(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Fails the first `failures` appends, then stores like its inner sink.
#[derive(Debug)]
pub struct FlakySink {
    failures: usize,
    inner: MemorySink,
}

impl FlakySink {
    pub fn new(failures: usize, inner: MemorySink) -> Self {
        Self { failures, inner }
    }
}

impl AuditSink for FlakySink {
    fn append(&mut self, record: &AuditRecord) -> io::Result<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(io::Error::other("disk full"));
        }
        self.inner.append(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A minimal record for audit tests.
pub fn sample_record(command: &str) -> AuditRecord {
    use crate::audit::ResultSummary;
    use crate::decision::{Decision, DenialKind};

    AuditRecord {
        sequence_number: 0,
        timestamp: chrono::Utc::now(),
        command: command.to_string(),
        reasoning: "test".to_string(),
        context: GatekeeperContext::new(),
        tier: RiskTier::Yellow,
        decision: Decision::deny(DenialKind::PolicyDenied, "test"),
        result: ResultSummary {
            success: false,
            denial_reason: Some("Blocklist: test".to_string()),
            exit_code: None,
            stdout_bytes: 0,
            stderr_bytes: 0,
            truncated: false,
            duration_ms: None,
        },
    }
}
