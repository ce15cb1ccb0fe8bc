//! Pipeline counters: shared by ingestion, the ledger writer, the
//! enrichment worker, and the download pool. Logged periodically.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub cids_appended: AtomicU64,
    pub ledger_append_failures: AtomicU64,
    pub ledger_rotations: AtomicU64,
    pub cids_enriched: AtomicU64,
    pub cids_already_seen: AtomicU64,
    pub invalid_lines: AtomicU64,
    pub enrichment_failures: AtomicU64,
    pub downloads_completed: AtomicU64,
    pub downloads_failed: AtomicU64,
    pub downloads_rejected: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub cids_appended: u64,
    pub ledger_append_failures: u64,
    pub ledger_rotations: u64,
    pub cids_enriched: u64,
    pub cids_already_seen: u64,
    pub invalid_lines: u64,
    pub enrichment_failures: u64,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub downloads_rejected: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_received: load(&self.frames_received),
            frames_dropped: load(&self.frames_dropped),
            cids_appended: load(&self.cids_appended),
            ledger_append_failures: load(&self.ledger_append_failures),
            ledger_rotations: load(&self.ledger_rotations),
            cids_enriched: load(&self.cids_enriched),
            cids_already_seen: load(&self.cids_already_seen),
            invalid_lines: load(&self.invalid_lines),
            enrichment_failures: load(&self.enrichment_failures),
            downloads_completed: load(&self.downloads_completed),
            downloads_failed: load(&self.downloads_failed),
            downloads_rejected: load(&self.downloads_rejected),
        }
    }

    pub fn print_stats(&self) {
        let s = self.snapshot();
        tracing::info!(
            frames_received = s.frames_received,
            frames_dropped = s.frames_dropped,
            cids_appended = s.cids_appended,
            ledger_append_failures = s.ledger_append_failures,
            ledger_rotations = s.ledger_rotations,
            cids_enriched = s.cids_enriched,
            cids_already_seen = s.cids_already_seen,
            invalid_lines = s.invalid_lines,
            enrichment_failures = s.enrichment_failures,
            downloads_completed = s.downloads_completed,
            downloads_failed = s.downloads_failed,
            downloads_rejected = s.downloads_rejected,
            "pipeline stats"
        );
    }
}
