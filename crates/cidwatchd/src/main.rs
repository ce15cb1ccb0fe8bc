//! cidwatchd: follows a Bitswap metrics exporter, records every wanted CID,
//! and enriches each new CID with its content type.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use cidwatch_core::config::{CidwatchConfig, StorageConfig};
use cidwatch_core::RetryPolicy;
use cidwatch_services::{
    open_seen_store, DownloadPool, Downloader, EnrichmentWorker, Ledger, LedgerTail, LedgerWriter,
    MetadataLog, MetadataSource, PipelineStats, DEFAULT_POLL_INTERVAL,
};

use cidwatchd::shutdown::{forward_signal, wait_for_signal};
use cidwatchd::{run_sessions, EventRouter, ReconnectBackoff, Session};

/// Batches buffered between the ingestion loop and the ledger writer.
const LEDGER_QUEUE_CAPACITY: usize = 1024;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load config
    if let Err(e) = CidwatchConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CidwatchConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CidwatchConfig::default()
    });

    tracing::info!(
        exporter = %config.exporter.socket_addr(),
        save_dir = %config.storage.save_dir.display(),
        protocol_version = config.exporter.protocol_version,
        metadata_source = ?config.collaborators.metadata_source,
        seen_store = ?config.storage.seen_store,
        rotation = ?config.storage.rotation,
        "cidwatchd starting"
    );

    prepare_dirs(&config.storage);
    let stats = Arc::new(PipelineStats::new());

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let shutdown = forward_signal(&shutdown_tx, wait_for_signal());

    // ── Ledger ───────────────────────────────────────────────────────────────

    let ledger_path = config.storage.ledger_path();
    let ledger = Ledger::open(
        &ledger_path,
        config.storage.ledger_max_bytes,
        config.storage.rotation,
    )
    .with_context(|| format!("failed to open ledger {}", ledger_path.display()))?;

    // Positioned before the first frame is read, so everything appended by
    // this run is seen and nothing older is.
    let tail = LedgerTail::from_end(&ledger_path, DEFAULT_POLL_INTERVAL)
        .await
        .context("failed to open ledger for tailing")?;

    let (ledger_tx, writer) = LedgerWriter::new(ledger, LEDGER_QUEUE_CAPACITY, stats.clone());
    let writer_task = tokio::spawn(writer.run());

    // ── Enrichment ───────────────────────────────────────────────────────────

    let retry = RetryPolicy::from(&config.retry);
    let seen = open_seen_store(config.storage.seen_store, &config.storage.seen_db_path())
        .context("failed to open seen-store")?;
    let source = MetadataSource::from_config(&config.collaborators, retry)
        .context("failed to build metadata client")?;
    let downloader = Downloader::new(
        config.collaborators.gateway_url.clone(),
        config.storage.download_path(),
        retry,
    )
    .context("failed to build download client")?;
    let pool = DownloadPool::spawn(downloader, &config.downloads, stats.clone());
    let metadata_log = MetadataLog::open(config.storage.metadata_path())
        .await
        .context("failed to open metadata file")?;

    let worker_task = tokio::spawn(
        EnrichmentWorker::new(
            tail,
            seen,
            source,
            metadata_log,
            pool.queue(),
            stats.clone(),
            shutdown.worker,
        )
        .run(),
    );

    let stats_printer = {
        let stats = stats.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                stats.print_stats();
            }
        })
    };

    // ── Exporter session ─────────────────────────────────────────────────────

    let router = EventRouter::new(ledger_tx, stats.clone());
    let mut session = Session::new(config.exporter.clone(), router);
    let mut session_shutdown = shutdown.session;
    let outcome = run_sessions(
        &mut session,
        ReconnectBackoff::from_config(&config.exporter),
        &mut session_shutdown,
    )
    .await
    .context("exporter session failed");
    // Drops the router, the ledger writer's only sender.
    drop(session);

    // ── Teardown ─────────────────────────────────────────────────────────────

    // Stops the worker when the session ended on its own.
    let _ = shutdown_tx.send(());

    // The writer drains what is queued and exits.
    if let Err(e) = writer_task.await {
        tracing::error!(error = %e, "ledger writer task failed");
    }
    if let Err(e) = worker_task.await {
        tracing::error!(error = %e, "enrichment worker task failed");
    }
    pool.shutdown().await;
    stats_printer.abort();
    stats.print_stats();

    match &outcome {
        Ok(()) => tracing::info!("cidwatchd stopped"),
        Err(e) => tracing::error!(error = %e, "cidwatchd stopped after session failure"),
    }
    outcome
}

/// Creates the output directories. Failures are logged; the file opens that
/// follow report anything fatal.
fn prepare_dirs(storage: &StorageConfig) {
    for dir in [storage.save_dir.clone(), storage.download_path()] {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(path = %dir.display(), error = %e, "failed to create directory");
        }
    }
}
