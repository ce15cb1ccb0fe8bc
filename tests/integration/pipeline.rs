use crate::*;

use cidwatch_core::config::ExporterConfig;
use cidwatch_core::WireError;
use cidwatch_services::{ExtractorClient, MemorySeenStore};
use cidwatchd::session::HandshakeError;
use cidwatchd::{ConnectionState, EventRouter, Session, SessionError};

async fn extractor_pipeline(tag: &str, base: &str) -> Pipeline {
    Pipeline::start(
        temp_dir(tag),
        PipelineOptions {
            source: MetadataSource::Extractor(
                ExtractorClient::new(base, base, fast_retry()).unwrap(),
            ),
            seen: Arc::new(MemorySeenStore::new()),
            gateway: base.to_string(),
            max_ledger_bytes: 1 << 30,
            rotation: RotationPolicy::Rename,
        },
    )
    .await
}

fn exporter_config(port: u16) -> ExporterConfig {
    ExporterConfig {
        port,
        ..ExporterConfig::default()
    }
}

/// Exporter frames flow through the session into the ledger and out the
/// other side as metadata records and downloads.
#[tokio::test]
async fn test_exporter_to_download() {
    let (base, calls) = spawn_collaborators().await;
    let pipeline = extractor_pipeline("e2e", &base).await;

    let exporter = spawn_exporter(3).await;
    let router = EventRouter::new(pipeline.ledger_tx.clone(), pipeline.stats.clone());
    let mut session = Session::new(exporter_config(exporter.port), router);
    let (_shutdown_tx, mut shutdown) = broadcast::channel(1);

    exporter
        .frames
        .send(wantlist_frame(&[TEXT_CID, TEXT_CID, IMAGE_CID]))
        .unwrap();
    exporter.frames.send(b"definitely not gzip".to_vec()).unwrap();
    exporter.frames.send(wantlist_frame(&[TEXT_CID])).unwrap();
    drop(exporter.frames);

    let result = session.run(&mut shutdown).await;
    assert!(
        matches!(result, Err(SessionError::Transport(WireError::ConnectionClosed))),
        "unexpected session result: {result:?}"
    );
    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(exporter.task.await.unwrap(), br#"{"version":3}"#.to_vec());
    drop(session);

    pipeline.wait_enriched(4).await.unwrap();
    wait_for(Duration::from_secs(5), || calls.download() >= 1)
        .await
        .unwrap();

    let snap = pipeline.stats.snapshot();
    let metadata_path = pipeline.metadata_path.clone();
    let download_dir = pipeline.download_dir.clone();
    let ledger_path = pipeline.ledger_path.clone();
    let dir = pipeline.stop().await;

    assert_eq!(snap.frames_received, 3);
    assert_eq!(snap.frames_dropped, 1);
    assert_eq!(snap.cids_appended, 4);

    assert_eq!(
        read_lines(&ledger_path),
        vec![TEXT_CID, TEXT_CID, IMAGE_CID, TEXT_CID]
    );

    // Repeats of TEXT hit the seen-store, not the extractor.
    assert_eq!(calls.extract(), 2);
    assert_eq!(calls.download(), 1);
    assert_eq!(
        read_lines(&metadata_path),
        vec![
            format!("{TEXT_CID} text/plain; charset=utf-8"),
            format!("{IMAGE_CID} image/png"),
        ]
    );
    assert_eq!(
        std::fs::read_to_string(download_dir.join(TEXT_CID)).unwrap(),
        format!("contents of {TEXT_CID}")
    );
    assert!(!download_dir.join(IMAGE_CID).exists());

    let _ = std::fs::remove_dir_all(&dir);
}

/// Lines already in the ledger when the tail opens are skipped.
#[tokio::test]
async fn test_existing_ledger_lines_are_not_backfilled() {
    let (base, calls) = spawn_collaborators().await;
    let dir = temp_dir("backfill");
    std::fs::write(dir.join("cids.txt"), format!("{IMAGE_CID}\n{JSON_CID}\n")).unwrap();

    let pipeline = Pipeline::start(
        dir,
        PipelineOptions {
            source: MetadataSource::Extractor(
                ExtractorClient::new(&base, &base, fast_retry()).unwrap(),
            ),
            seen: Arc::new(MemorySeenStore::new()),
            gateway: base.clone(),
            max_ledger_bytes: 1 << 30,
            rotation: RotationPolicy::Rename,
        },
    )
    .await;

    pipeline.append(&[TEXT_CID]).await;
    pipeline.wait_enriched(1).await.unwrap();

    let metadata_path = pipeline.metadata_path.clone();
    let dir = pipeline.stop().await;

    assert_eq!(calls.extract(), 1);
    assert_eq!(
        read_lines(&metadata_path),
        vec![format!("{TEXT_CID} text/plain; charset=utf-8")]
    );
    let _ = std::fs::remove_dir_all(&dir);
}

/// A version mismatch ends the session before any reply is written.
#[tokio::test]
async fn test_version_mismatch_over_tcp() {
    let exporter = spawn_exporter(2).await;
    let (tx, mut rx) = mpsc::channel::<LedgerBatch>(4);
    let router = EventRouter::new(tx, Arc::new(PipelineStats::new()));
    let mut session = Session::new(exporter_config(exporter.port), router);
    let (_shutdown_tx, mut shutdown) = broadcast::channel(1);

    let result = session.run(&mut shutdown).await;
    assert!(matches!(
        result,
        Err(SessionError::Handshake(HandshakeError::VersionMismatch {
            expected: 3,
            received: 2
        }))
    ));
    assert!(!session.streamed());

    // The exporter saw the socket close without a reply frame.
    assert!(exporter.task.await.unwrap().is_empty());
    drop(session);
    assert!(rx.recv().await.is_none());
}

/// Shutdown during streaming closes the session cleanly.
#[tokio::test]
async fn test_shutdown_closes_session() {
    let exporter = spawn_exporter(3).await;
    let (tx, _rx) = mpsc::channel::<LedgerBatch>(4);
    let router = EventRouter::new(tx, Arc::new(PipelineStats::new()));
    let mut session = Session::new(exporter_config(exporter.port), router);
    let (shutdown_tx, mut shutdown) = broadcast::channel(1);

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown_tx.send(()).unwrap();
    });

    assert!(session.run(&mut shutdown).await.is_ok());
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(session.streamed());
    stopper.await.unwrap();
    drop(exporter.frames);
}
