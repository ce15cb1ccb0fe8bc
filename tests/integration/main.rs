//! cidwatch integration test harness.
//!
//! Everything runs in-process against local fakes: an axum server stands in
//! for the extractor, gateway, and search index, and a TCP listener plays
//! the metrics exporter. No external services are needed:
//!
//!   cargo test --test integration

mod pipeline;
mod rotation;
mod search_index;
mod seen_store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use axum::extract::{Json as JsonBody, Path as UrlPath, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use cidwatch_core::config::{DownloadSettings, RotationPolicy, WhenFull};
use cidwatch_core::decode::compress_json;
use cidwatch_core::{FrameTransport, RetryPolicy};
use cidwatch_services::{
    DownloadPool, Downloader, EnrichmentWorker, Ledger, LedgerBatch, LedgerTail, LedgerWriter,
    MetadataLog, MetadataSource, PipelineStats, SeenStore,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// Resolves to `text/plain; charset=utf-8`.
pub const TEXT_CID: &str = "QmPAqyAfL3eG4jM7yRtMW27zrPwcdfQSxVYbGMEAgvnVLK";
/// Resolves to `image/png`.
pub const IMAGE_CID: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi";
/// Resolves to `application/json`.
pub const JSON_CID: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzaa";
/// The extractor reports an error for this one.
pub const BROKEN_CID: &str = "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzbb";

fn content_type_for(cid: &str) -> Option<&'static str> {
    match cid {
        TEXT_CID => Some("text/plain; charset=utf-8"),
        IMAGE_CID => Some("image/png"),
        JSON_CID => Some("application/json"),
        _ => None,
    }
}

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh scratch directory, unique per test.
pub fn temp_dir(tag: &str) -> PathBuf {
    let id = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "cidwatch-it-{tag}-{}-{}",
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_secs(5),
        max_attempts: 2,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    if cond() {
        return Ok(());
    }
    bail!("condition not met within {timeout:?}")
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

// ── Fake collaborators ────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct CallCounts {
    pub extract: Arc<AtomicUsize>,
    pub search: Arc<AtomicUsize>,
    pub download: Arc<AtomicUsize>,
}

impl CallCounts {
    pub fn extract(&self) -> usize {
        self.extract.load(Ordering::SeqCst)
    }
    pub fn search(&self) -> usize {
        self.search.load(Ordering::SeqCst)
    }
    pub fn download(&self) -> usize {
        self.download.load(Ordering::SeqCst)
    }
}

async fn extract(
    State(calls): State<CallCounts>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    calls.extract.fetch_add(1, Ordering::SeqCst);
    let cid = q
        .get("url")
        .and_then(|u| u.rsplit('/').next())
        .unwrap_or_default();
    match content_type_for(cid) {
        Some(ct) => Json(serde_json::json!({"metadata": {"Content-Type": [ct]}})),
        None => Json(serde_json::json!({"metadata": {}, "error": "unable to parse document"})),
    }
}

async fn gateway(State(calls): State<CallCounts>, UrlPath(cid): UrlPath<String>) -> String {
    calls.download.fetch_add(1, Ordering::SeqCst);
    format!("contents of {cid}")
}

async fn search(
    State(calls): State<CallCounts>,
    JsonBody(body): JsonBody<serde_json::Value>,
) -> Json<serde_json::Value> {
    calls.search.fetch_add(1, Ordering::SeqCst);
    let cid = body["query"]["match"]["_id"].as_str().unwrap_or_default();
    match content_type_for(cid) {
        Some(ct) => Json(serde_json::json!({"hits": {"hits": [{"_source": {
            "metadata": {"Content-Type": [ct]},
            "references": [{"name": format!("{cid}.bin")}]
        }}]}})),
        None => Json(serde_json::json!({"hits": {"hits": []}})),
    }
}

/// Extractor, gateway, and search index on one local port.
pub async fn spawn_collaborators() -> (String, CallCounts) {
    let calls = CallCounts::default();
    let app = Router::new()
        .route("/extract", get(extract))
        .route("/ipfs/{cid}", get(gateway))
        .route("/_search", get(search))
        .with_state(calls.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), calls)
}

// ── Fake exporter ─────────────────────────────────────────────────────────────

/// Gzipped event frame announcing a want-list.
pub fn wantlist_frame(cids: &[&str]) -> Vec<u8> {
    let entries: Vec<_> = cids
        .iter()
        .map(|c| serde_json::json!({"Cid": {"/": c}, "Priority": 1, "WantType": 0}))
        .collect();
    compress_json(&serde_json::json!({"event": {
        "timestamp": "2022-05-01T10:00:00Z",
        "peer": "12D3KooWExporterPeer",
        "bitswap_message": {"wantlist_entries": entries, "full_wantlist": false}
    }}))
    .unwrap()
}

pub struct FakeExporter {
    pub port: u16,
    /// Frames queued here are written after the handshake.
    pub frames: mpsc::UnboundedSender<Vec<u8>>,
    /// Resolves to the client's handshake reply.
    pub task: JoinHandle<Vec<u8>>,
}

/// Accepts one connection, announces `version`, then forwards queued
/// frames until the sender is dropped and closes the socket.
pub async fn spawn_exporter(version: u16) -> FakeExporter {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut transport = FrameTransport::new(stream);
        let hello = serde_json::to_vec(&serde_json::json!({"version": version})).unwrap();
        transport.write_frame(&hello).await.unwrap();

        let reply = match transport.read_frame().await {
            Ok(r) => r.to_vec(),
            Err(_) => return Vec::new(),
        };
        while let Some(frame) = rx.recv().await {
            if transport.write_frame(&frame).await.is_err() {
                break;
            }
        }
        reply
    });

    FakeExporter {
        port,
        frames: tx,
        task,
    }
}

// ── Pipeline assembly ─────────────────────────────────────────────────────────

/// Ledger writer, enrichment worker, and download pool wired the way the
/// daemon wires them, over files in a scratch directory.
pub struct Pipeline {
    pub dir: PathBuf,
    pub ledger_path: PathBuf,
    pub metadata_path: PathBuf,
    pub download_dir: PathBuf,
    pub ledger_tx: mpsc::Sender<LedgerBatch>,
    pub stats: Arc<PipelineStats>,
    shutdown: broadcast::Sender<()>,
    writer: JoinHandle<()>,
    worker: JoinHandle<()>,
    pool: DownloadPool,
}

pub struct PipelineOptions {
    pub source: MetadataSource,
    pub seen: Arc<dyn SeenStore>,
    pub gateway: String,
    pub max_ledger_bytes: u64,
    pub rotation: RotationPolicy,
}

impl Pipeline {
    pub async fn start(dir: PathBuf, opts: PipelineOptions) -> Self {
        let ledger_path = dir.join("cids.txt");
        let metadata_path = dir.join("cids_meta.txt");
        let download_dir = dir.join("downloaded");
        std::fs::create_dir_all(&download_dir).unwrap();

        let stats = Arc::new(PipelineStats::new());
        let ledger = Ledger::open(&ledger_path, opts.max_ledger_bytes, opts.rotation).unwrap();
        let tail = LedgerTail::from_end(&ledger_path, Duration::from_millis(10))
            .await
            .unwrap();
        let (ledger_tx, writer) = LedgerWriter::new(ledger, 64, stats.clone());
        let writer = tokio::spawn(writer.run());

        let downloader = Downloader::new(opts.gateway, &download_dir, fast_retry()).unwrap();
        let settings = DownloadSettings {
            max_concurrent: 4,
            queue_capacity: 32,
            when_full: WhenFull::Block,
            drain_timeout_secs: 5,
        };
        let pool = DownloadPool::spawn(downloader, &settings, stats.clone());

        let metadata_log = MetadataLog::open(&metadata_path).await.unwrap();
        let (shutdown, _) = broadcast::channel(1);
        let worker = tokio::spawn(
            EnrichmentWorker::new(
                tail,
                opts.seen,
                opts.source,
                metadata_log,
                pool.queue(),
                stats.clone(),
                shutdown.subscribe(),
            )
            .run(),
        );

        Self {
            dir,
            ledger_path,
            metadata_path,
            download_dir,
            ledger_tx,
            stats,
            shutdown,
            writer,
            worker,
            pool,
        }
    }

    pub async fn append(&self, cids: &[&str]) {
        let batch = cids.iter().map(|c| c.parse().unwrap()).collect();
        self.ledger_tx.send(batch).await.unwrap();
    }

    pub async fn wait_enriched(&self, n: u64) -> Result<()> {
        let stats = self.stats.clone();
        wait_for(Duration::from_secs(10), move || {
            let s = stats.snapshot();
            s.cids_enriched + s.enrichment_failures + s.cids_already_seen >= n
        })
        .await
    }

    /// Graceful stop in daemon order. Returns the scratch dir for asserts.
    pub async fn stop(self) -> PathBuf {
        let Pipeline {
            dir,
            ledger_tx,
            shutdown,
            writer,
            worker,
            pool,
            ..
        } = self;
        drop(ledger_tx);
        writer.await.unwrap();
        let _ = shutdown.send(());
        worker.await.unwrap();
        pool.shutdown().await;
        dir
    }
}
