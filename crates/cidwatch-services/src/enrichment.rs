//! Enrichment worker: follows the ledger, resolves each new CID's content
//! type, records it, and queues qualifying objects for download.
//!
//! Coupled to ingestion only through the ledger file. A slow or failing
//! collaborator delays this loop and nothing upstream of it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use cidwatch_core::Cid;

use crate::collaborator::MetadataSource;
use crate::download::{should_download, DownloadQueue, SubmitOutcome};
use crate::metadata_log::MetadataLog;
use crate::seen::SeenStore;
use crate::stats::PipelineStats;
use crate::tail::LedgerTail;

/// Pause after a tail error before trying again.
const TAIL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Not a CID; skipped.
    Invalid,
    AlreadySeen,
    Enriched {
        content_type: String,
        download: bool,
    },
    /// Collaborator failed; the CID stays unseen.
    Failed,
}

pub struct EnrichmentWorker {
    tail: LedgerTail,
    seen: Arc<dyn SeenStore>,
    source: MetadataSource,
    metadata_log: MetadataLog,
    downloads: DownloadQueue,
    stats: Arc<PipelineStats>,
    shutdown: broadcast::Receiver<()>,
}

impl EnrichmentWorker {
    pub fn new(
        tail: LedgerTail,
        seen: Arc<dyn SeenStore>,
        source: MetadataSource,
        metadata_log: MetadataLog,
        downloads: DownloadQueue,
        stats: Arc<PipelineStats>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            tail,
            seen,
            source,
            metadata_log,
            downloads,
            stats,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            ledger = %self.tail.path().display(),
            metadata = %self.metadata_log.path().display(),
            source = self.source.name(),
            "enrichment worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("enrichment worker shutting down");
                    break;
                }
                line = self.tail.next_line() => match line {
                    Ok(line) => {
                        self.process_line(&line).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "ledger tail failed");
                        tokio::time::sleep(TAIL_ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }

    /// Handle one ledger line. Never fails; every problem is logged and
    /// reflected in the outcome.
    pub async fn process_line(&mut self, line: &str) -> LineOutcome {
        let text = line.trim();
        let cid: Cid = match text.parse() {
            Ok(cid) => cid,
            Err(e) => {
                PipelineStats::incr(&self.stats.invalid_lines);
                tracing::warn!(line = text, error = %e, "skipping unparseable ledger line");
                return LineOutcome::Invalid;
            }
        };

        match self.seen.contains(&cid) {
            Ok(true) => {
                PipelineStats::incr(&self.stats.cids_already_seen);
                tracing::trace!(%cid, "already enriched");
                return LineOutcome::AlreadySeen;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(%cid, error = %e, "seen-store lookup failed, treating as new");
            }
        }

        let info = match self.source.content_info(&cid).await {
            Ok(info) => info,
            Err(e) => {
                PipelineStats::incr(&self.stats.enrichment_failures);
                tracing::warn!(%cid, source = self.source.name(), error = %e, "enrichment failed");
                return LineOutcome::Failed;
            }
        };

        let content_type = info.primary_type().to_string();
        if info.content_types.is_empty() {
            tracing::info!(%cid, "collaborator declared no content type");
        } else {
            tracing::info!(
                %cid,
                content_type = %content_type,
                reference = info.reference_name.as_deref().unwrap_or(""),
                "CID enriched"
            );
        }

        if let Err(e) = self.metadata_log.record(&cid, &content_type).await {
            tracing::warn!(%cid, error = %e, "failed to write metadata record");
        }
        if let Err(e) = self.seen.insert(&cid, &content_type) {
            tracing::warn!(%cid, error = %e, "failed to mark CID as seen");
        }
        PipelineStats::incr(&self.stats.cids_enriched);

        let download = should_download(&content_type);
        if download {
            match self.downloads.submit(cid.clone()).await {
                SubmitOutcome::Queued => tracing::debug!(%cid, "download queued"),
                SubmitOutcome::Rejected => {}
                SubmitOutcome::Closed => {
                    tracing::warn!(%cid, "download pool closed, skipping download")
                }
            }
        }

        LineOutcome::Enriched {
            content_type,
            download,
        }
    }
}
