use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::*;
use crate::testing::{sample_record, FlakySink, Gate, MemorySink, StallingSink};

fn config(queue_size: usize, max_wait: Duration) -> AuditConfig {
    AuditConfig {
        queue_size,
        max_wait,
    }
}

#[tokio::test]
async fn test_records_are_numbered_and_persisted_in_order() {
    let sink = MemorySink::new();
    let logger = AuditLogger::start(Box::new(sink.clone()), AuditConfig::default()).unwrap();

    for i in 0..5 {
        let seq = logger.log(sample_record(&format!("cmd {}", i))).await.unwrap();
        assert_eq!(seq, i + 1);
    }
    let stats = logger.shutdown().await.unwrap();

    assert_eq!(stats, WriterStats { written: 5, failed: 0 });
    let records = sink.records();
    let seqs: Vec<u64> = records.iter().map(|r| r.sequence_number).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert_eq!(records[3].command, "cmd 3");
    assert_eq!(sink.flushes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_leave_no_gaps() {
    let sink = MemorySink::new();
    let logger = Arc::new(
        AuditLogger::start(Box::new(sink.clone()), config(16, Duration::from_secs(10))).unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..200 {
        let logger = logger.clone();
        handles.push(tokio::spawn(async move {
            logger.log(sample_record(&format!("cmd {}", i))).await.unwrap()
        }));
    }

    let mut assigned = HashSet::new();
    for handle in handles {
        assert!(assigned.insert(handle.await.unwrap()));
    }
    logger.shutdown().await.unwrap();

    let seqs: Vec<u64> = sink.records().iter().map(|r| r.sequence_number).collect();
    let expected: Vec<u64> = (1..=200).collect();
    assert_eq!(seqs, expected);
    assert_eq!(assigned.len(), 200);
}

#[tokio::test]
async fn test_full_queue_fails_after_max_wait() {
    let gate = Gate::default();
    let memory = MemorySink::new();
    let sink = StallingSink::new(gate.clone(), memory.clone());
    let max_wait = Duration::from_millis(200);
    let logger = AuditLogger::start(Box::new(sink), config(1000, max_wait)).unwrap();

    // The writer holds at most one record while stalled, so 1000 or 1001
    // submissions succeed before the queue is full.
    let mut accepted = 0u64;
    let rejected_after = loop {
        let started = Instant::now();
        match logger.log(sample_record("fill")).await {
            Ok(seq) => {
                accepted += 1;
                assert_eq!(seq, accepted);
            }
            Err(e) => break (e, started.elapsed()),
        }
        assert!(accepted <= 1001, "queue never filled");
    };

    assert!(accepted == 1000 || accepted == 1001, "accepted {}", accepted);
    let (err, waited) = rejected_after;
    assert!(matches!(err, AuditError::BackpressureExceeded { .. }));
    assert!(waited >= max_wait);

    // A rejected submission does not consume a sequence number.
    gate.open();
    let next = logger.log(sample_record("after")).await.unwrap();
    assert_eq!(next, accepted + 1);

    logger.shutdown().await.unwrap();
    let records = memory.records();
    assert_eq!(records.len() as u64, accepted + 1);
    assert!(records
        .iter()
        .enumerate()
        .all(|(i, r)| r.sequence_number == i as u64 + 1));
}

#[tokio::test]
async fn test_shutdown_drains_queued_records() {
    let gate = Gate::default();
    let memory = MemorySink::new();
    let sink = StallingSink::new(gate.clone(), memory.clone());
    let logger = AuditLogger::start(Box::new(sink), AuditConfig::default()).unwrap();

    for _ in 0..10 {
        logger.log(sample_record("queued")).await.unwrap();
    }
    assert!(memory.records().is_empty());

    let opener = gate.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        opener.open();
    });

    let stats = logger.shutdown().await.unwrap();
    assert_eq!(stats.written, 10);
    assert_eq!(memory.records().len(), 10);
}

#[tokio::test]
async fn test_log_after_shutdown_is_rejected() {
    let logger = AuditLogger::start(Box::new(MemorySink::new()), AuditConfig::default()).unwrap();
    logger.shutdown().await.unwrap();

    assert!(matches!(
        logger.log(sample_record("late")).await,
        Err(AuditError::Closed)
    ));
    // Second shutdown is a no-op.
    assert_eq!(logger.shutdown().await.unwrap(), WriterStats::default());
}

#[tokio::test]
async fn test_jsonl_sink_round_trips_through_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit").join("trail.jsonl");
    let sink = JsonlSink::open(&path, 0, 0).unwrap();
    let logger = AuditLogger::start(Box::new(sink), AuditConfig::default()).unwrap();

    logger.log(sample_record("ls -la")).await.unwrap();
    logger.log(sample_record("rm notes.txt")).await.unwrap();
    logger.shutdown().await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 2);
    for line in text.lines() {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }

    let records = replay(&path).unwrap();
    assert_eq!(records[0].command, "ls -la");
    assert_eq!(records[1].sequence_number, 2);
    assert_eq!(records[1].decision.denial_reason().as_deref(), Some("Blocklist: test"));
}

#[test]
fn test_jsonl_sink_rotates_and_keeps_backups() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trail.jsonl");
    let mut sink = JsonlSink::open(&path, 400, 2).unwrap();

    for seq in 1..=12 {
        let mut record = sample_record("echo rotate");
        record.sequence_number = seq;
        sink.append(&record).unwrap();
    }
    sink.flush().unwrap();

    let backup = |n: usize| {
        let mut p = path.clone().into_os_string();
        p.push(format!(".{}", n));
        std::path::PathBuf::from(p)
    };
    assert!(backup(1).exists());
    assert!(backup(2).exists());
    assert!(!backup(3).exists());

    // Oldest to newest, the surviving records are still in sequence order.
    let mut seqs = Vec::new();
    for file in [backup(2), backup(1), path.clone()] {
        seqs.extend(replay(&file).unwrap().iter().map(|r| r.sequence_number));
    }
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(seqs.last(), Some(&12));
}

#[test]
fn test_replay_reports_bad_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.jsonl");
    std::fs::write(&path, "{\"not\": \"a record\"}\n").unwrap();

    let err = replay(&path).unwrap_err();
    assert!(err.to_string().contains("line 1"));
}

#[tokio::test]
async fn test_transient_store_failure_is_retried() {
    let memory = MemorySink::new();
    let logger =
        AuditLogger::start(Box::new(FlakySink::new(1, memory.clone())), AuditConfig::default())
            .unwrap();

    for i in 0..3 {
        logger.log(sample_record(&format!("cmd {}", i))).await.unwrap();
    }
    let stats = logger.shutdown().await.unwrap();

    assert_eq!(stats, WriterStats { written: 3, failed: 0 });
    let seqs: Vec<u64> = memory.records().iter().map(|r| r.sequence_number).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_persistent_store_failure_is_counted() {
    let memory = MemorySink::new();
    let logger =
        AuditLogger::start(Box::new(FlakySink::new(4, memory.clone())), AuditConfig::default())
            .unwrap();

    // Accepted even though the store will reject them.
    for i in 0..3 {
        logger.log(sample_record(&format!("cmd {}", i))).await.unwrap();
    }
    let stats = logger.shutdown().await.unwrap();

    // Two attempts each for records 1 and 2; record 3 lands.
    assert_eq!(stats, WriterStats { written: 1, failed: 2 });
    assert_eq!(memory.records()[0].sequence_number, 3);
}
