//! CID ledger: the append-only hand-off file between ingestion and
//! enrichment.
//!
//! One CID per line, appended in event-arrival order, no dedupe. The file
//! size is checked after every append; once it exceeds the ceiling the
//! active file is rotated according to `RotationPolicy`. Either way the
//! active file is empty immediately after the check that crossed the
//! ceiling.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use cidwatch_core::config::RotationPolicy;
use cidwatch_core::Cid;

use crate::stats::PipelineStats;

/// A batch of CIDs discovered in one event, in iteration order.
pub type LedgerBatch = Vec<Cid>;

pub struct Ledger {
    path: PathBuf,
    file: File,
    max_bytes: u64,
    rotation: RotationPolicy,
}

impl Ledger {
    /// Open (creating if needed) the ledger in append mode.
    pub fn open(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        rotation: RotationPolicy,
    ) -> Result<Self, LedgerError> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file,
            max_bytes,
            rotation,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one CID as a newline-terminated record, then enforce the
    /// size ceiling. Returns true when the append triggered a rotation.
    pub fn append(&mut self, cid: &Cid) -> Result<bool, LedgerError> {
        // Single write per record so concurrent appenders never interleave.
        let record = format!("{cid}\n");
        self.file
            .write_all(record.as_bytes())
            .map_err(|e| LedgerError::Io(self.path.clone(), e))?;
        self.enforce_ceiling()
    }

    /// Current size of the active ledger file.
    pub fn len(&self) -> Result<u64, LedgerError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| LedgerError::Io(self.path.clone(), e))
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }

    fn enforce_ceiling(&mut self) -> Result<bool, LedgerError> {
        let size = self.len()?;
        if size <= self.max_bytes {
            return Ok(false);
        }

        match self.rotation {
            RotationPolicy::Truncate => {
                self.file
                    .set_len(0)
                    .map_err(|e| LedgerError::Io(self.path.clone(), e))?;
            }
            RotationPolicy::Rename => {
                let rotated = rotated_path(&self.path);
                fs::rename(&self.path, &rotated)
                    .map_err(|e| LedgerError::Io(rotated.clone(), e))?;
                self.file = open_append(&self.path)?;
            }
        }

        tracing::info!(
            path = %self.path.display(),
            size,
            max_bytes = self.max_bytes,
            policy = ?self.rotation,
            "ledger rotated"
        );
        Ok(true)
    }
}

/// Where `RotationPolicy::Rename` moves a full ledger. One generation is
/// kept; the previous `.1` is replaced.
pub fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".1");
    path.with_file_name(name)
}

fn open_append(path: &Path) -> Result<File, LedgerError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| LedgerError::Io(path.to_path_buf(), e))
}

// ── Writer task ───────────────────────────────────────────────────────────────

/// Sole owner of the ledger file handle. Ingestion sends one batch per
/// event over a bounded channel, so appends land in arrival order and a
/// slow disk pushes back on the reader instead of piling up tasks.
pub struct LedgerWriter {
    ledger: Ledger,
    batches: mpsc::Receiver<LedgerBatch>,
    stats: Arc<PipelineStats>,
}

impl LedgerWriter {
    pub fn new(
        ledger: Ledger,
        capacity: usize,
        stats: Arc<PipelineStats>,
    ) -> (mpsc::Sender<LedgerBatch>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                ledger,
                batches: rx,
                stats,
            },
        )
    }

    /// Runs until every sender is dropped and the queue is drained. Each
    /// batch is written on the blocking pool since a rotation renames files.
    pub async fn run(self) {
        let LedgerWriter {
            mut ledger,
            mut batches,
            stats,
        } = self;
        tracing::info!(path = %ledger.path().display(), "ledger writer started");

        while let Some(batch) = batches.recv().await {
            let stats = stats.clone();
            let written = tokio::task::spawn_blocking(move || {
                write_batch(&mut ledger, &batch, &stats);
                ledger
            })
            .await;
            ledger = match written {
                Ok(ledger) => ledger,
                Err(e) => {
                    tracing::error!(error = %e, "ledger write task failed, writer stopping");
                    return;
                }
            };
        }
        tracing::info!("ledger writer drained, exiting");
    }
}

/// Append failures are logged per record and never stop the writer.
fn write_batch(ledger: &mut Ledger, batch: &[Cid], stats: &PipelineStats) {
    for cid in batch {
        match ledger.append(cid) {
            Ok(rotated) => {
                PipelineStats::incr(&stats.cids_appended);
                if rotated {
                    PipelineStats::incr(&stats.ledger_rotations);
                }
            }
            Err(e) => {
                PipelineStats::incr(&stats.ledger_append_failures);
                tracing::warn!(%cid, error = %e, "failed to append CID to ledger");
            }
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger I/O on {0}: {1}")]
    Io(PathBuf, std::io::Error),
}
