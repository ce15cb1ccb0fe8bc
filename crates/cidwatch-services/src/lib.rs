//! cidwatch-services. Everything downstream of the wire: the CID ledger
//! and its follower, the seen-store, collaborator clients, the enrichment
//! worker, and the download pool.

pub mod collaborator;
pub mod download;
pub mod enrichment;
pub mod ledger;
pub mod metadata_log;
pub mod seen;
pub mod stats;
pub mod tail;

pub use collaborator::{
    ContentInfo, EnrichmentError, ExtractorClient, MetadataSource, SearchIndexClient,
};
pub use download::{
    should_download, DownloadError, DownloadPool, DownloadQueue, Downloader, SubmitOutcome,
};
pub use enrichment::{EnrichmentWorker, LineOutcome};
pub use ledger::{rotated_path, Ledger, LedgerBatch, LedgerError, LedgerWriter};
pub use metadata_log::MetadataLog;
pub use seen::{open_seen_store, MemorySeenStore, SeenStore, SeenStoreError, SqliteSeenStore};
pub use stats::PipelineStats;
pub use tail::{LedgerTail, DEFAULT_POLL_INTERVAL};
