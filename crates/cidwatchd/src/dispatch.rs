//! Routes decoded events to their side effects.
//!
//! Bitswap want-lists go to the ledger writer as one batch per event.
//! Connection events are deliberately not acted on.

use std::sync::Arc;

use tokio::sync::mpsc;

use cidwatch_core::{EventKind, IncomingMessage};
use cidwatch_services::{LedgerBatch, PipelineStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Number of CIDs handed to the ledger writer.
    Appended(usize),
    Ignored,
}

pub struct EventRouter {
    ledger: mpsc::Sender<LedgerBatch>,
    stats: Arc<PipelineStats>,
}

impl EventRouter {
    pub fn new(ledger: mpsc::Sender<LedgerBatch>, stats: Arc<PipelineStats>) -> Self {
        Self { ledger, stats }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Waits for space in the ledger queue, so a slow disk slows ingestion
    /// rather than growing memory.
    pub async fn route(&self, msg: IncomingMessage) -> Routed {
        let Some(event) = msg.event else {
            tracing::trace!("frame carried no event");
            return Routed::Ignored;
        };

        match event.kind {
            EventKind::Bitswap(bitswap) => {
                let batch: LedgerBatch = bitswap
                    .wantlist_entries
                    .into_iter()
                    .map(|entry| entry.cid)
                    .collect();
                let count = batch.len();
                if count == 0 {
                    return Routed::Appended(0);
                }

                if self.ledger.send(batch).await.is_err() {
                    tracing::warn!(count, "ledger writer stopped, dropping want-list CIDs");
                    return Routed::Ignored;
                }
                tracing::debug!(peer = %event.peer, count, "want-list routed to ledger");
                Routed::Appended(count)
            }
            EventKind::Connection(conn) => {
                tracing::trace!(
                    peer = %event.peer,
                    remote = %conn.remote,
                    kind = ?conn.connection_event_type,
                    "connection event (no action)"
                );
                Routed::Ignored
            }
            EventKind::None => Routed::Ignored,
        }
    }
}
