//! End-to-end coverage across placement, retrieval, node death, and
//! self-healing, driven directly against the coordinator's engines rather
//! than through the HTTP surface.

mod support;

use std::time::Duration;

use chunkvault::config::CoordinatorConfig;
use chunkvault::coordinator::Coordinator;
use chunkvault::error::CoordinatorError;
use chunkvault::healing;

use support::FakeNode;

fn test_config(work_dir: std::path::PathBuf, redundancy: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        bind_addr: "127.0.0.1:0".into(),
        work_dir,
        redundancy,
        chunk_size: 64,
        heartbeat_timeout: Duration::from_secs(30),
        heal_idle_sleep: Duration::from_millis(50),
        node_timeout: Duration::from_secs(5),
        manifest_key_override: None,
    }
}

async fn write_source_file(dir: &std::path::Path, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join("source.bin");
    tokio::fs::write(&path, contents).await.unwrap();
    path
}

#[tokio::test]
async fn three_node_happy_path_round_trips() {
    let work_dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::bootstrap(test_config(work_dir.path().to_path_buf(), 3))
        .await
        .unwrap();

    let n1 = FakeNode::spawn().await;
    let n2 = FakeNode::spawn().await;
    let n3 = FakeNode::spawn().await;
    for (id, node) in [("n1", &n1), ("n2", &n2), ("n3", &n3)] {
        coordinator.registry.register(id, node.addr.ip().to_string(), node.addr.port(), 10_000_000);
    }

    let contents: Vec<u8> = (0..500u32).map(|i| (i % 256) as u8).collect();
    let source = write_source_file(work_dir.path(), &contents).await;
    let file_id = coordinator.placement.place_file(&source, "payload.bin".into()).await.unwrap();

    let manifest = coordinator.manifest_store.load(&file_id).await.unwrap();
    assert!(manifest.degraded_chunks.is_empty());
    for chunk in &manifest.chunks {
        assert_eq!(chunk.node_ids.len(), 3, "every chunk should land on all three nodes");
    }

    let (path, original_name) = coordinator.retrieval.retrieve_file(&file_id, &coordinator.config).await.unwrap();
    assert_eq!(original_name, "payload.bin");
    let roundtripped = tokio::fs::read(&path).await.unwrap();
    assert_eq!(roundtripped, contents);
}

#[tokio::test]
async fn survives_loss_of_a_single_node() {
    let work_dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::bootstrap(test_config(work_dir.path().to_path_buf(), 2))
        .await
        .unwrap();

    let n1 = FakeNode::spawn().await;
    let n2 = FakeNode::spawn().await;
    coordinator.registry.register("n1", n1.addr.ip().to_string(), n1.addr.port(), 10_000_000);
    coordinator.registry.register("n2", n2.addr.ip().to_string(), n2.addr.port(), 10_000_000);

    let contents = b"small payload that fits in one chunk".to_vec();
    let source = write_source_file(work_dir.path(), &contents).await;
    let file_id = coordinator.placement.place_file(&source, "notes.txt".into()).await.unwrap();

    // n2 goes dark without the coordinator ever learning about it explicitly.
    n2.kill().await;

    let (path, _) = coordinator.retrieval.retrieve_file(&file_id, &coordinator.config).await.unwrap();
    let roundtripped = tokio::fs::read(&path).await.unwrap();
    assert_eq!(roundtripped, contents);
}

#[tokio::test]
async fn self_heal_restores_redundancy_after_node_death() {
    let work_dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::bootstrap(test_config(work_dir.path().to_path_buf(), 2))
        .await
        .unwrap();

    let n1 = FakeNode::spawn().await;
    let n2 = FakeNode::spawn().await;
    let n3 = FakeNode::spawn().await;
    coordinator.registry.register("n1", n1.addr.ip().to_string(), n1.addr.port(), 10_000_000);
    coordinator.registry.register("n2", n2.addr.ip().to_string(), n2.addr.port(), 10_000_000);
    coordinator.registry.register("n3", n3.addr.ip().to_string(), n3.addr.port(), 10_000_000);

    let contents = b"data that will need healing".to_vec();
    let source = write_source_file(work_dir.path(), &contents).await;
    let file_id = coordinator.placement.place_file(&source, "heal-me.bin".into()).await.unwrap();

    let manifest_before = coordinator.manifest_store.load(&file_id).await.unwrap();
    let chunk_id = manifest_before.chunks[0].chunk_id.clone();
    let replicas_before = manifest_before.chunks[0].node_ids.clone();
    assert_eq!(replicas_before.len(), 2);

    let dead_node = replicas_before[0].clone();
    match dead_node.as_str() {
        "n1" => n1.kill().await,
        "n2" => n2.kill().await,
        "n3" => n3.kill().await,
        other => panic!("unexpected node id {other}"),
    }
    coordinator.registry.sweep();
    assert!(!coordinator.registry.is_live(&dead_node));

    healing::heal_chunk(
        &chunk_id,
        &coordinator.manifest_store,
        &coordinator.registry,
        &coordinator.node_client,
        &coordinator.chunk_map,
        coordinator.config.redundancy,
    )
    .await
    .unwrap();

    let manifest_after = coordinator.manifest_store.load(&file_id).await.unwrap();
    let healed = &manifest_after.chunks[0];
    assert_eq!(healed.node_ids.len(), 2);
    assert!(!healed.node_ids.contains(&dead_node));
}

#[tokio::test]
async fn upload_with_no_live_nodes_is_rejected() {
    let work_dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::bootstrap(test_config(work_dir.path().to_path_buf(), 3))
        .await
        .unwrap();

    let contents = b"irrelevant".to_vec();
    let source = write_source_file(work_dir.path(), &contents).await;
    let result = coordinator.placement.place_file(&source, "orphan.bin".into()).await;

    assert!(matches!(result, Err(CoordinatorError::NoNodesOnline)));
}

#[tokio::test]
async fn healing_a_chunk_with_no_surviving_replica_is_unhealable() {
    let work_dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::bootstrap(test_config(work_dir.path().to_path_buf(), 1))
        .await
        .unwrap();

    let n1 = FakeNode::spawn().await;
    coordinator.registry.register("n1", n1.addr.ip().to_string(), n1.addr.port(), 10_000_000);

    let contents = b"one replica only".to_vec();
    let source = write_source_file(work_dir.path(), &contents).await;
    let file_id = coordinator.placement.place_file(&source, "fragile.bin".into()).await.unwrap();

    let manifest = coordinator.manifest_store.load(&file_id).await.unwrap();
    let chunk_id = manifest.chunks[0].chunk_id.clone();

    n1.kill().await;
    coordinator.registry.sweep();

    let err = healing::heal_chunk(
        &chunk_id,
        &coordinator.manifest_store,
        &coordinator.registry,
        &coordinator.node_client,
        &coordinator.chunk_map,
        coordinator.config.redundancy,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CoordinatorError::Unhealable(_)));
}

#[tokio::test]
async fn corrupted_manifest_on_disk_surfaces_as_corrupt_manifest_error() {
    let work_dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::bootstrap(test_config(work_dir.path().to_path_buf(), 1))
        .await
        .unwrap();

    let n1 = FakeNode::spawn().await;
    coordinator.registry.register("n1", n1.addr.ip().to_string(), n1.addr.port(), 10_000_000);

    let contents = b"manifest will be tampered with".to_vec();
    let source = write_source_file(work_dir.path(), &contents).await;
    let file_id = coordinator.placement.place_file(&source, "tamper.bin".into()).await.unwrap();

    let record_path = coordinator
        .config
        .manifests_dir()
        .join(format!("{file_id}_manifest_chunk_0000.bin"));
    let mut bytes = tokio::fs::read(&record_path).await.unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    tokio::fs::write(&record_path, bytes).await.unwrap();

    let err = coordinator.manifest_store.load(&file_id).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::CorruptManifest(_, _)));
}
