use crate::*;

use cidwatch_services::{ExtractorClient, MemorySeenStore};

/// 60-byte CIDv1s the extractor has no metadata for.
fn rotating_cids() -> Vec<String> {
    ('a'..='t')
        .map(|c| format!("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbq{c}{c}"))
        .collect()
}

async fn small_ledger_pipeline(tag: &str, base: &str, rotation: RotationPolicy) -> Pipeline {
    Pipeline::start(
        temp_dir(tag),
        PipelineOptions {
            source: MetadataSource::Extractor(
                ExtractorClient::new(base, base, fast_retry()).unwrap(),
            ),
            seen: Arc::new(MemorySeenStore::new()),
            gateway: base.to_string(),
            max_ledger_bytes: 200,
            rotation,
        },
    )
    .await
}

/// Appends in pairs and waits for each pair, so at most one rotation
/// happens between tail reads.
async fn feed_paced(pipeline: &Pipeline, cids: &[String]) {
    let mut done = 0;
    for pair in cids.chunks(2) {
        let refs: Vec<&str> = pair.iter().map(String::as_str).collect();
        pipeline.append(&refs).await;
        done += refs.len() as u64;
        pipeline.wait_enriched(done).await.unwrap();
    }
}

#[tokio::test]
async fn test_rename_rotation_loses_no_lines() {
    let (base, calls) = spawn_collaborators().await;
    let pipeline = small_ledger_pipeline("rotate-rename", &base, RotationPolicy::Rename).await;
    let cids = rotating_cids();

    feed_paced(&pipeline, &cids).await;

    let snap = pipeline.stats.snapshot();
    let ledger_path = pipeline.ledger_path.clone();
    let dir = pipeline.stop().await;

    assert_eq!(snap.cids_appended, cids.len() as u64);
    assert!(snap.ledger_rotations >= 4, "rotations: {}", snap.ledger_rotations);
    assert_eq!(snap.enrichment_failures, cids.len() as u64);
    assert_eq!(calls.extract(), cids.len());

    // The live file stays under the ceiling and the previous generation
    // sits next to it.
    assert!(std::fs::metadata(&ledger_path).unwrap().len() <= 200);
    let rotated = cidwatch_services::rotated_path(&ledger_path);
    assert!(!read_lines(&rotated).is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}

/// Truncation may race the tail for the record that crossed the ceiling,
/// but the tail must pick up everything written after it.
#[tokio::test]
async fn test_truncate_rotation_keeps_tail_in_step() {
    let (base, _calls) = spawn_collaborators().await;
    let pipeline = small_ledger_pipeline("rotate-truncate", &base, RotationPolicy::Truncate).await;
    let cids = rotating_cids();

    // Three records fit under the ceiling; the fourth crosses it.
    for (i, cid) in cids[..3].iter().enumerate() {
        pipeline.append(&[cid.as_str()]).await;
        pipeline.wait_enriched(i as u64 + 1).await.unwrap();
    }
    pipeline.append(&[cids[3].as_str()]).await;
    wait_for(Duration::from_secs(5), || {
        pipeline.stats.snapshot().ledger_rotations == 1
    })
    .await
    .unwrap();

    pipeline.append(&[TEXT_CID]).await;
    let metadata_path = pipeline.metadata_path.clone();
    wait_for(Duration::from_secs(10), || {
        read_lines(&metadata_path) == vec![format!("{TEXT_CID} text/plain; charset=utf-8")]
    })
    .await
    .unwrap();

    let ledger_path = pipeline.ledger_path.clone();
    let dir = pipeline.stop().await;

    assert_eq!(read_lines(&ledger_path), vec![TEXT_CID]);
    assert!(!cidwatch_services::rotated_path(&ledger_path).exists());

    let _ = std::fs::remove_dir_all(&dir);
}
