use crate::*;

use cidwatch_services::{ExtractorClient, SqliteSeenStore};

fn options(base: &str, db: &Path) -> PipelineOptions {
    PipelineOptions {
        source: MetadataSource::Extractor(ExtractorClient::new(base, base, fast_retry()).unwrap()),
        seen: Arc::new(SqliteSeenStore::open(db).unwrap()),
        gateway: base.to_string(),
        max_ledger_bytes: 1 << 30,
        rotation: RotationPolicy::Rename,
    }
}

/// A restart with the SQLite store does not re-enrich or re-download.
#[tokio::test]
async fn test_sqlite_seen_store_survives_restart() {
    let (base, calls) = spawn_collaborators().await;
    let dir = temp_dir("seen");
    let db = dir.join("state").join("seen.db");

    let first = Pipeline::start(dir, options(&base, &db)).await;
    first.append(&[TEXT_CID, IMAGE_CID]).await;
    first.wait_enriched(2).await.unwrap();
    wait_for(Duration::from_secs(5), || calls.download() >= 1)
        .await
        .unwrap();
    let dir = first.stop().await;

    assert_eq!(calls.extract(), 2);
    assert_eq!(calls.download(), 1);

    let second = Pipeline::start(dir, options(&base, &db)).await;
    second.append(&[TEXT_CID, IMAGE_CID, JSON_CID]).await;
    second.wait_enriched(3).await.unwrap();
    wait_for(Duration::from_secs(5), || calls.download() >= 2)
        .await
        .unwrap();

    let snap = second.stats.snapshot();
    let metadata_path = second.metadata_path.clone();
    let dir = second.stop().await;

    assert_eq!(snap.cids_already_seen, 2);
    assert_eq!(snap.cids_enriched, 1);
    assert_eq!(calls.extract(), 3);
    assert_eq!(calls.download(), 2);
    assert_eq!(
        read_lines(&metadata_path),
        vec![
            format!("{TEXT_CID} text/plain; charset=utf-8"),
            format!("{IMAGE_CID} image/png"),
            format!("{JSON_CID} application/json"),
        ]
    );

    let _ = std::fs::remove_dir_all(&dir);
}
