//! Upload path: mint a `file_id`, generate a fresh per-file key, split the
//! plaintext into fixed-size chunks, and place each chunk's ciphertext on
//! `redundancy` distinct live nodes chosen at random, recording whatever
//! subset of placements actually succeeded.

use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::chunk_map::ChunkMap;
use crate::chunker;
use crate::config::CoordinatorConfig;
use crate::crypto;
use crate::error::CoordinatorError;
use crate::manifest::{ChunkDescriptor, Manifest, ManifestStore};
use crate::node_client::NodeClient;
use crate::registry::{NodeRecord, NodeRegistry};

pub struct PlacementEngine {
    manifest_store: Arc<ManifestStore>,
    registry: Arc<NodeRegistry>,
    node_client: Arc<NodeClient>,
    chunk_map: Arc<ChunkMap>,
    redundancy: usize,
    chunk_size: usize,
}

impl PlacementEngine {
    pub fn new(
        manifest_store: Arc<ManifestStore>,
        registry: Arc<NodeRegistry>,
        node_client: Arc<NodeClient>,
        chunk_map: Arc<ChunkMap>,
        redundancy: usize,
        chunk_size: usize,
    ) -> Self {
        PlacementEngine {
            manifest_store,
            registry,
            node_client,
            chunk_map,
            redundancy,
            chunk_size,
        }
    }

    /// Splits `source_path`, places every chunk, persists the manifest, and
    /// returns the minted `file_id`. Fails with `NoNodesOnline` up front if
    /// the registry is empty; a chunk that places on zero nodes is recorded
    /// in `degraded_chunks` rather than failing the whole upload.
    pub async fn place_file(
        &self,
        source_path: &Path,
        original_filename: String,
    ) -> Result<String, CoordinatorError> {
        let live_nodes = self.registry.snapshot();
        if live_nodes.is_empty() {
            return Err(CoordinatorError::NoNodesOnline);
        }

        let file_id = format!("file-{}", hex::encode(&Uuid::new_v4().as_bytes()[..3]));
        let data_key = crypto::generate_key();

        let raw_chunks = chunker::split(source_path, self.chunk_size)?;

        let mut chunk_descriptors = Vec::with_capacity(raw_chunks.len());
        let mut degraded_chunks = Vec::new();

        let mut handles = Vec::with_capacity(raw_chunks.len());
        for (local_chunk_id, bytes) in raw_chunks {
            let chunk_id = format!("{file_id}_{local_chunk_id}");
            let ciphertext = crypto::encrypt(&bytes, &data_key);
            let targets = pick_targets(&live_nodes, self.redundancy);
            let node_client = self.node_client.clone();

            handles.push(tokio::spawn(async move {
                let mut placed = Vec::new();
                for (node_id, record) in targets {
                    match node_client.store_chunk(&record.endpoint(), &chunk_id, &ciphertext).await {
                        Ok(()) => placed.push(node_id),
                        Err(err) => log::warn!("placement of '{chunk_id}' on '{node_id}' failed: {err}"),
                    }
                }
                (chunk_id, placed)
            }));
        }

        for handle in handles {
            let (chunk_id, placed) = handle
                .await
                .map_err(|err| anyhow::anyhow!("placement task panicked: {err}"))?;

            if placed.is_empty() {
                log::error!("chunk '{chunk_id}' placed on zero nodes, marking manifest degraded");
                degraded_chunks.push(chunk_id.clone());
            }

            let mut descriptor = ChunkDescriptor::new(chunk_id.clone());
            for node_id in placed {
                self.chunk_map.record(&chunk_id, &node_id);
                descriptor.add_replica(node_id);
            }
            chunk_descriptors.push(descriptor);
        }

        let manifest = Manifest {
            original_filename,
            chunks: chunk_descriptors,
            encryption_key: data_key.to_base64(),
            degraded_chunks,
        };

        self.manifest_store.save(&file_id, &manifest).await?;
        Ok(file_id)
    }
}

/// Selects up to `redundancy` distinct nodes at random from the live set.
fn pick_targets(
    live_nodes: &std::collections::HashMap<String, NodeRecord>,
    redundancy: usize,
) -> Vec<(String, NodeRecord)> {
    let mut all: Vec<(String, NodeRecord)> = live_nodes
        .iter()
        .map(|(id, record)| (id.clone(), record.clone()))
        .collect();
    all.shuffle(&mut rand::thread_rng());
    all.truncate(redundancy);
    all
}

pub fn temp_upload_path(config: &CoordinatorConfig, token: &str) -> std::path::PathBuf {
    config.temp_uploads_dir().join(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Instant;

    fn node(id: &str, port: u16) -> (String, NodeRecord) {
        (
            id.to_string(),
            NodeRecord {
                host: "127.0.0.1".into(),
                port,
                storage_available: 1024,
                last_seen: Instant::now(),
            },
        )
    }

    #[test]
    fn pick_targets_never_exceeds_live_node_count() {
        let mut nodes = HashMap::new();
        let (id, record) = node("n1", 9001);
        nodes.insert(id, record);

        let targets = pick_targets(&nodes, 3);
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn pick_targets_caps_at_redundancy() {
        let mut nodes = HashMap::new();
        for i in 0..5 {
            let (id, record) = node(&format!("n{i}"), 9000 + i as u16);
            nodes.insert(id, record);
        }

        let targets = pick_targets(&nodes, 3);
        assert_eq!(targets.len(), 3);

        let mut ids: Vec<&String> = targets.iter().map(|(id, _)| id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3, "targets must be distinct nodes");
    }
}
