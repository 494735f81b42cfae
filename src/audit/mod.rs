//! Durable, ordered audit trail.
//!
//! Every pipeline decision is submitted here as one [`AuditRecord`]. Records
//! go through a bounded queue to a single background writer thread that owns
//! the [`AuditSink`].
//!
//! # Ordering
//!
//! Sequence numbers are assigned while holding the producer lock, in the
//! same critical section that places the record in the queue. The queue is
//! therefore always in sequence order and gap-free, and the single writer
//! persists records in exactly that order regardless of how pipeline tasks
//! were scheduled.
//!
//! # Backpressure
//!
//! A full queue blocks the submitting pipeline for at most `max_wait`. After
//! that the submission fails with [`AuditError::BackpressureExceeded`] and no
//! sequence number is consumed. Records already queued are never dropped.
//!
//! # Store failures
//!
//! A record is accepted once it is queued, so a store failure surfaces after
//! the caller already has its sequence number. The writer retries a failed
//! append once; if that fails too the record is lost. It is logged at
//! `error` and counted in [`WriterStats::failed`], which `shutdown` returns.

mod sink;

use std::sync::Mutex as StdMutex;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::context::GatekeeperContext;
use crate::decision::Decision;
use crate::error::AuditError;
use crate::security::RiskTier;

pub use sink::{replay, AuditSink, JsonlSink};

/// What happened to the command, without the captured output itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout_bytes: usize,
    #[serde(default)]
    pub stderr_bytes: usize,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Assigned by [`AuditLogger::log`]; zero until then.
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub reasoning: String,
    pub context: GatekeeperContext,
    pub tier: RiskTier,
    pub decision: Decision,
    pub result: ResultSummary,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub queue_size: usize,
    pub max_wait: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            max_wait: Duration::from_secs(5),
        }
    }
}

/// Totals reported by the writer when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    pub failed: u64,
}

#[derive(Debug)]
struct Producer {
    tx: mpsc::Sender<AuditRecord>,
    next_seq: u64,
}

/// Bounded queue plus single background writer.
///
/// Create one per process with [`AuditLogger::start`] and share it by
/// reference (`Arc`) with every pipeline.
#[derive(Debug)]
pub struct AuditLogger {
    producer: Mutex<Option<Producer>>,
    writer: StdMutex<Option<JoinHandle<WriterStats>>>,
    max_wait: Duration,
}

impl AuditLogger {
    /// Spawn the writer thread and return a logger feeding it.
    pub fn start(sink: Box<dyn AuditSink>, config: AuditConfig) -> Result<Self, AuditError> {
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));

        let writer = std::thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || writer_loop(rx, sink))
            .map_err(AuditError::Spawn)?;

        info!(
            "Audit logger started (queue {}, max wait {:?})",
            config.queue_size, config.max_wait
        );

        Ok(Self {
            producer: Mutex::new(Some(Producer { tx, next_seq: 1 })),
            writer: StdMutex::new(Some(writer)),
            max_wait: config.max_wait,
        })
    }

    /// Enqueue a record and return its sequence number.
    ///
    /// Blocks while the queue is full, up to the configured maximum wait.
    pub async fn log(&self, mut record: AuditRecord) -> Result<u64, AuditError> {
        let enqueue = async {
            let mut guard = self.producer.lock().await;
            let producer = guard.as_mut().ok_or(AuditError::Closed)?;
            let permit = producer.tx.reserve().await.map_err(|_| AuditError::Closed)?;

            let seq = producer.next_seq;
            producer.next_seq += 1;
            record.sequence_number = seq;
            permit.send(record);
            Ok::<u64, AuditError>(seq)
        };

        match tokio::time::timeout(self.max_wait, enqueue).await {
            Ok(result) => result,
            Err(_) => {
                error!("Audit queue full for {:?}, rejecting record", self.max_wait);
                Err(AuditError::BackpressureExceeded {
                    waited: self.max_wait,
                })
            }
        }
    }

    /// Stop accepting records, drain the queue and release the store.
    ///
    /// Returns once every record accepted before the call is persisted.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<WriterStats, AuditError> {
        // Dropping the sender lets the writer drain and exit.
        let producer = self.producer.lock().await.take();
        drop(producer);

        let handle = self
            .writer
            .lock()
            .map_err(|_| AuditError::Closed)?
            .take();
        let Some(handle) = handle else {
            return Ok(WriterStats::default());
        };

        let stats = tokio::task::spawn_blocking(move || handle.join())
            .await
            .map_err(|_| AuditError::Closed)?
            .map_err(|_| AuditError::Closed)?;

        info!(
            "Audit logger closed ({} written, {} failed)",
            stats.written, stats.failed
        );
        Ok(stats)
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            if writer.is_some() {
                error!("AuditLogger dropped without shutdown(); queued records may be lost");
                writer.take();
            }
        }
    }
}

fn writer_loop(mut rx: mpsc::Receiver<AuditRecord>, mut sink: Box<dyn AuditSink>) -> WriterStats {
    let mut stats = WriterStats::default();
    let mut last_seq = 0u64;

    while let Some(record) = rx.blocking_recv() {
        if record.sequence_number <= last_seq {
            error!(
                "Audit record {} arrived after {}; queue order violated",
                record.sequence_number, last_seq
            );
        }
        last_seq = record.sequence_number;

        let appended = sink.append(&record).or_else(|e| {
            warn!(
                "Audit record {} not persisted ({}), retrying",
                record.sequence_number, e
            );
            sink.append(&record)
        });
        match appended {
            Ok(()) => {
                stats.written += 1;
                debug!("Audit record {} persisted", record.sequence_number);
            }
            Err(e) => {
                stats.failed += 1;
                error!(
                    "Audit record {} lost after retry: {}",
                    record.sequence_number, e
                );
            }
        }
    }

    if let Err(e) = sink.flush() {
        error!("Failed to flush audit store: {}", e);
    }
    stats
}

#[cfg(test)]
mod tests;
