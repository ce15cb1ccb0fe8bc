//! Content downloader and its bounded worker pool.
//!
//! `Downloader` fetches `<gateway>/ipfs/<cid>` and streams the body into
//! `<output_dir>/<cid>`. `DownloadPool` puts a queue and a concurrency cap
//! in front of it; the enrichment worker submits through a cloneable
//! `DownloadQueue`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use cidwatch_core::config::{DownloadSettings, WhenFull};
use cidwatch_core::{Cid, RetryPolicy, Retryable};

use crate::collaborator::gateway_object_url;
use crate::stats::PipelineStats;

/// Content-type substrings that qualify an object for download.
pub const DOWNLOADABLE_MARKERS: [&str; 5] = ["text", "html", "json", "javascript", "xhtml+xml"];

pub fn should_download(content_type: &str) -> bool {
    DOWNLOADABLE_MARKERS
        .iter()
        .any(|marker| content_type.contains(marker))
}

// ── Downloader ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Downloader {
    http: reqwest::Client,
    gateway: String,
    output_dir: PathBuf,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new(
        gateway: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Result<Self, DownloadError> {
        let http = reqwest::Client::builder().timeout(retry.timeout).build()?;
        Ok(Self {
            http,
            gateway: gateway.into(),
            output_dir: output_dir.into(),
            retry,
        })
    }

    /// Where the object for `cid` is written.
    pub fn target_path(&self, cid: &Cid) -> PathBuf {
        self.output_dir.join(cid.as_str())
    }

    /// Fetch the object and write it to `target_path`. Only obtaining a
    /// successful response is retried; a failure while streaming the body
    /// leaves the partial file in place.
    pub async fn download(&self, cid: &Cid) -> Result<PathBuf, DownloadError> {
        let url = gateway_object_url(&self.gateway, cid);
        let mut resp = self.retry.run("download", |_| self.request(&url)).await?;

        let path = self.target_path(cid);
        let io_err = |source| DownloadError::Io {
            path: path.clone(),
            source,
        };
        let mut file = tokio::fs::File::create(&path).await.map_err(io_err)?;

        let mut written: u64 = 0;
        while let Some(chunk) = resp.chunk().await? {
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;

        tracing::info!(%cid, bytes = written, path = %path.display(), "download complete");
        Ok(path)
    }

    async fn request(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }
        Ok(resp)
    }
}

// ── Pool ──────────────────────────────────────────────────────────────────────

/// Result of handing a CID to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Queue full under `WhenFull::Reject`.
    Rejected,
    /// Pool is shutting down.
    Closed,
}

/// Producer handle for the pool.
#[derive(Clone)]
pub struct DownloadQueue {
    tx: mpsc::Sender<Cid>,
    when_full: WhenFull,
    stats: Arc<PipelineStats>,
}

impl DownloadQueue {
    pub async fn submit(&self, cid: Cid) -> SubmitOutcome {
        match self.when_full {
            WhenFull::Block => match self.tx.send(cid).await {
                Ok(()) => SubmitOutcome::Queued,
                Err(_) => SubmitOutcome::Closed,
            },
            WhenFull::Reject => match self.tx.try_send(cid) {
                Ok(()) => SubmitOutcome::Queued,
                Err(mpsc::error::TrySendError::Full(cid)) => {
                    PipelineStats::incr(&self.stats.downloads_rejected);
                    tracing::warn!(%cid, "download queue full, dropping request");
                    SubmitOutcome::Rejected
                }
                Err(mpsc::error::TrySendError::Closed(_)) => SubmitOutcome::Closed,
            },
        }
    }
}

pub struct DownloadPool {
    queue: DownloadQueue,
    dispatcher: JoinHandle<()>,
    drain_timeout: Duration,
}

impl DownloadPool {
    pub fn spawn(
        downloader: Downloader,
        settings: &DownloadSettings,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let max_concurrent = settings.max_concurrent.max(1);

        tracing::info!(
            max_concurrent,
            queue_capacity = settings.queue_capacity,
            when_full = ?settings.when_full,
            "download pool started"
        );

        let dispatcher = tokio::spawn(dispatch(rx, downloader, max_concurrent, stats.clone()));
        Self {
            queue: DownloadQueue {
                tx,
                when_full: settings.when_full,
                stats,
            },
            dispatcher,
            drain_timeout: Duration::from_secs(settings.drain_timeout_secs),
        }
    }

    pub fn queue(&self) -> DownloadQueue {
        self.queue.clone()
    }

    pub async fn submit(&self, cid: Cid) -> SubmitOutcome {
        self.queue.submit(cid).await
    }

    /// Stop accepting work and wait for queued and in-flight downloads, up
    /// to the drain timeout. Outstanding queues held elsewhere must already
    /// be dropped or the wait runs to the timeout.
    pub async fn shutdown(self) {
        let DownloadPool {
            queue,
            mut dispatcher,
            drain_timeout,
        } = self;
        drop(queue);

        match tokio::time::timeout(drain_timeout, &mut dispatcher).await {
            Ok(_) => tracing::info!("download pool drained"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = drain_timeout.as_secs(),
                    "download pool drain timed out, aborting in-flight downloads"
                );
                dispatcher.abort();
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<Cid>,
    downloader: Downloader,
    max_concurrent: usize,
    stats: Arc<PipelineStats>,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut in_flight = JoinSet::new();

    while let Some(cid) = rx.recv().await {
        while in_flight.try_join_next().is_some() {}

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let downloader = downloader.clone();
        let stats = stats.clone();

        in_flight.spawn(async move {
            match downloader.download(&cid).await {
                Ok(_) => PipelineStats::incr(&stats.downloads_completed),
                Err(e) => {
                    PipelineStats::incr(&stats.downloads_failed);
                    tracing::warn!(%cid, error = %e, "download failed");
                }
            }
            drop(permit);
        });
    }

    // Dropping the JoinSet aborts these if the drain timeout fires.
    while in_flight.join_next().await.is_some() {}
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway returned HTTP {0}")]
    Status(StatusCode),

    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Retryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Request(e) => !e.is_builder(),
            DownloadError::Status(s) => {
                s.is_server_error() || *s == StatusCode::TOO_MANY_REQUESTS
            }
            DownloadError::Io { .. } => false,
        }
    }
}
