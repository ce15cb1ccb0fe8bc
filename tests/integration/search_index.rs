use crate::*;

use cidwatch_services::{MemorySeenStore, SearchIndexClient};

#[tokio::test]
async fn test_search_index_source() {
    let (base, calls) = spawn_collaborators().await;
    let pipeline = Pipeline::start(
        temp_dir("search"),
        PipelineOptions {
            source: MetadataSource::SearchIndex(
                SearchIndexClient::new(base.clone(), fast_retry()).unwrap(),
            ),
            seen: Arc::new(MemorySeenStore::new()),
            gateway: base.clone(),
            max_ledger_bytes: 1 << 30,
            rotation: RotationPolicy::Rename,
        },
    )
    .await;

    pipeline.append(&[TEXT_CID, IMAGE_CID, BROKEN_CID]).await;
    pipeline.wait_enriched(3).await.unwrap();
    wait_for(Duration::from_secs(5), || calls.download() >= 1)
        .await
        .unwrap();

    let snap = pipeline.stats.snapshot();
    let metadata_path = pipeline.metadata_path.clone();
    let download_dir = pipeline.download_dir.clone();
    let dir = pipeline.stop().await;

    assert_eq!(snap.cids_enriched, 2);
    // No hits is a failure, not an "unknown" record.
    assert_eq!(snap.enrichment_failures, 1);
    assert_eq!(calls.search(), 3);
    assert_eq!(calls.extract(), 0);
    assert_eq!(calls.download(), 1);

    assert_eq!(
        read_lines(&metadata_path),
        vec![
            format!("{TEXT_CID} text/plain; charset=utf-8"),
            format!("{IMAGE_CID} image/png"),
        ]
    );
    assert!(download_dir.join(TEXT_CID).exists());

    let _ = std::fs::remove_dir_all(&dir);
}
