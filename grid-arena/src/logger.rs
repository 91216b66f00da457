//! Durable audit trail of game events.
//!
//! Producers push records into a capacity-bounded ring guarded by its own
//! lock, never the game-state lock. A single consumer task drains the ring,
//! appends one line per record to the audit file, and flushes after every
//! drain so a crash loses at most the records still queued.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::state::Arena;

/// One audit entry. Sequence numbers are consumed by every emit attempt,
/// dropped records included, so gaps in the written file reveal overflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub seq: u64,
    pub message: String,
}

/// The bounded ring producers write into.
///
/// Overflow policy is drop-newest: records already queued are never
/// overwritten, the incoming record is discarded instead.
pub struct AuditLog {
    ring: Mutex<Ring>,
    signal: Notify,
}

struct Ring {
    records: VecDeque<AuditRecord>,
    capacity: usize,
    next_seq: u64,
    dropped: u64,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                records: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 0,
                dropped: 0,
            }),
            signal: Notify::new(),
        }
    }

    /// Queues one record and wakes the consumer.
    pub fn emit(&self, message: impl Into<String>) {
        let mut ring = self.lock();
        let seq = ring.next_seq;
        ring.next_seq += 1;

        if ring.records.len() >= ring.capacity {
            ring.dropped += 1;
            return;
        }

        ring.records.push_back(AuditRecord {
            seq,
            message: message.into(),
        });
        drop(ring);

        self.signal.notify_one();
    }

    /// Removes and returns everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<AuditRecord> {
        self.lock().records.drain(..).collect()
    }

    /// Records discarded because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// Wakes the consumer without queuing anything. Used on shutdown so the
    /// final drain runs promptly.
    pub fn wake(&self) {
        self.signal.notify_one();
    }

    async fn notified(&self) {
        self.signal.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap()
    }
}

/// Opens the audit file for appending. Called at startup so a bad path is
/// caught before any task spawns.
pub async fn open(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("failed to open audit file {}", path.display()))
}

/// Consumer loop: drain, append, flush, sleep until woken. Exits after one
/// final drain once the arena deactivates.
pub async fn run(arena: Arc<Arena>, mut file: File) {
    loop {
        // Snapshot the flag before draining: shutdown clears it and then
        // emits its own record, so the pass that observes the cleared flag
        // must still drain once more before it may stop.
        let was_active = arena.is_active();

        let records = arena.audit_log().drain();
        if let Err(err) = append_records(&mut file, &records).await {
            // Persistence trouble never takes the game down.
            warn!(error = ?err, "failed to append audit records");
        }

        if !was_active {
            break;
        }

        let _ = timeout(
            arena.config().fallback_interval,
            arena.audit_log().notified(),
        )
        .await;
    }

    let dropped = arena.audit_log().dropped();
    if dropped > 0 {
        info!(dropped, "audit ring overflowed during this run");
    }
}

async fn append_records(file: &mut File, records: &[AuditRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    for record in records {
        let line = format!("{} {}\n", record.seq, record.message);
        file.write_all(line.as_bytes()).await?;
    }
    file.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_records_oldest_first() {
        let log = AuditLog::new(8);
        log.emit("first");
        log.emit("second");

        let records = log.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].seq, 0);
        assert_eq!(records[0].message, "first");
        assert_eq!(records[1].seq, 1);
        assert!(log.drain().is_empty());
    }

    #[test]
    fn overflow_drops_newest_and_keeps_oldest() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            log.emit(format!("event {i}"));
        }

        let records = log.drain();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2], "oldest records must survive");
        assert_eq!(log.dropped(), 2);

        // The dropped attempts consumed their sequence numbers, so the next
        // record exposes the gap.
        log.emit("after overflow");
        assert_eq!(log.drain()[0].seq, 5);
    }

    #[test]
    fn concurrent_emitters_never_overwrite_queued_records() {
        let log = std::sync::Arc::new(AuditLog::new(8));

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let log = std::sync::Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        log.emit(format!("worker {worker} event {i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("emitter thread");
        }

        let records = log.drain();
        assert_eq!(records.len(), 8);
        assert_eq!(log.dropped(), 32);
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs must increase");
    }

    #[tokio::test]
    async fn records_emitted_during_shutdown_reach_the_file() {
        use crate::config::ArenaConfig;
        use crate::scores::ScoreTable;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("audit.log");
        let file = open(&path).await.expect("open audit file");

        let arena =
            Arc::new(Arena::new(ArenaConfig::default(), ScoreTable::new()).expect("arena"));
        // Deactivation queues its own record after the flag falls; the
        // consumer's final drain must still write it.
        arena.shutdown();
        run(Arc::clone(&arena), file).await;

        let written = std::fs::read_to_string(&path).expect("read back");
        assert!(
            written.contains("server shutting down"),
            "final drain missed the shutdown record: {written:?}"
        );
        assert!(arena.audit_log().drain().is_empty());
    }

    #[tokio::test]
    async fn append_writes_one_flushed_line_per_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("audit.log");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .expect("open audit file");

        let records = vec![
            AuditRecord {
                seq: 0,
                message: "player 1 connected".into(),
            },
            AuditRecord {
                seq: 2,
                message: "player 1 placed X at (0, 0)".into(),
            },
        ];
        append_records(&mut file, &records).await.expect("append");

        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(
            written,
            "0 player 1 connected\n2 player 1 placed X at (0, 0)\n"
        );
    }
}
