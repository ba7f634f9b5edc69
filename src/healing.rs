//! Self-healing: re-replicating chunks that have fallen below the
//! redundancy target. A deduplicated FIFO queue of chunk ids, drained by a
//! single background worker that sleeps when idle and wakes immediately on
//! `enqueue` or an explicit `/heal_now` request.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::Notify;

use crate::chunk_map::ChunkMap;
use crate::error::CoordinatorError;
use crate::manifest::ManifestStore;
use crate::node_client::NodeClient;
use crate::registry::NodeRegistry;

/// FIFO queue of chunk ids pending re-replication, deduplicated so a chunk
/// already queued is never queued twice.
pub struct HealingQueue {
    queue: Mutex<VecDeque<String>>,
    queued: Mutex<HashSet<String>>,
    notify: Notify,
}

impl Default for HealingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl HealingQueue {
    pub fn new() -> Self {
        HealingQueue {
            queue: Mutex::new(VecDeque::new()),
            queued: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        }
    }

    /// Adds `chunk_id` to the tail of the queue unless it is already queued,
    /// then wakes the healing worker.
    pub fn enqueue(&self, chunk_id: String) {
        let mut queued = self.queued.lock().unwrap();
        if queued.insert(chunk_id.clone()) {
            self.queue.lock().unwrap().push_back(chunk_id);
            self.notify.notify_one();
        }
    }

    fn pop(&self) -> Option<String> {
        let chunk_id = self.queue.lock().unwrap().pop_front();
        if let Some(ref id) = chunk_id {
            self.queued.lock().unwrap().remove(id);
        }
        chunk_id
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nudges an idle worker into an immediate pass, for `/heal_now`.
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

/// Runs forever, healing chunks as they appear in `queue`. Intended to be
/// spawned once as a single background task — one worker, not one per
/// chunk.
pub async fn run(
    queue: Arc<HealingQueue>,
    manifest_store: Arc<ManifestStore>,
    registry: Arc<NodeRegistry>,
    node_client: Arc<NodeClient>,
    chunk_map: Arc<ChunkMap>,
    redundancy: usize,
    idle_sleep: Duration,
) {
    loop {
        match queue.pop() {
            Some(chunk_id) => {
                if let Err(err) =
                    heal_chunk(&chunk_id, &manifest_store, &registry, &node_client, &chunk_map, redundancy).await
                {
                    log::warn!("heal '{chunk_id}' failed: {err}");
                }
            }
            None => {
                tokio::select! {
                    _ = tokio::time::sleep(idle_sleep) => {}
                    _ = queue.notify.notified() => {}
                }
            }
        }
    }
}

/// Locates the manifest owning `chunk_id`, fetches plaintext bytes from a
/// surviving replica, and pushes copies out to enough additional live nodes
/// to restore `redundancy`. Returns `Unhealable` if no live node holds a
/// usable replica.
pub async fn heal_chunk(
    chunk_id: &str,
    manifest_store: &ManifestStore,
    registry: &NodeRegistry,
    node_client: &NodeClient,
    chunk_map: &ChunkMap,
    redundancy: usize,
) -> Result<(), CoordinatorError> {
    let (file_id, mut manifest) = find_owning_manifest(chunk_id, manifest_store)
        .await?
        .ok_or_else(|| CoordinatorError::Unhealable(chunk_id.to_string()))?;

    let chunk_index = manifest
        .chunks
        .iter()
        .position(|c| c.chunk_id == chunk_id)
        .ok_or_else(|| CoordinatorError::Unhealable(chunk_id.to_string()))?;

    let live_nodes = registry.snapshot();
    let surviving: Vec<String> = manifest.chunks[chunk_index]
        .node_ids
        .iter()
        .filter(|id| live_nodes.contains_key(id.as_str()))
        .cloned()
        .collect();

    let needed = redundancy.saturating_sub(surviving.len());
    if needed == 0 {
        return Ok(());
    }

    let mut ciphertext = None;
    for node_id in &surviving {
        let Some(record) = live_nodes.get(node_id) else { continue };
        match node_client.get_chunk(&record.endpoint(), chunk_id).await {
            Ok(bytes) => {
                ciphertext = Some(bytes);
                break;
            }
            Err(err) => log::warn!("heal '{chunk_id}': replica on '{node_id}' unreadable: {err}"),
        }
    }
    let ciphertext = ciphertext.ok_or_else(|| CoordinatorError::Unhealable(chunk_id.to_string()))?;

    let mut candidates: Vec<(String, String)> = live_nodes
        .iter()
        .filter(|(id, _)| !surviving.contains(id))
        .map(|(id, record)| (id.clone(), record.endpoint()))
        .collect();
    candidates.shuffle(&mut rand::thread_rng());

    let mut placed = 0usize;
    for (node_id, endpoint) in candidates {
        if placed >= needed {
            break;
        }
        match node_client.store_chunk(&endpoint, chunk_id, &ciphertext).await {
            Ok(()) => {
                chunk_map.record(chunk_id, &node_id);
                manifest.chunks[chunk_index].add_replica(node_id);
                placed += 1;
            }
            Err(err) => log::warn!("heal '{chunk_id}': placement on '{node_id}' failed: {err}"),
        }
    }

    if placed == 0 {
        return Err(CoordinatorError::Unhealable(chunk_id.to_string()));
    }

    manifest_store.update(&file_id, &manifest).await?;
    Ok(())
}

async fn find_owning_manifest(
    chunk_id: &str,
    manifest_store: &ManifestStore,
) -> Result<Option<(String, crate::manifest::Manifest)>, CoordinatorError> {
    for file_id in manifest_store.list().await? {
        let manifest = match manifest_store.load(&file_id).await {
            Ok(m) => m,
            Err(CoordinatorError::FileNotFound(_)) => continue,
            Err(err) => {
                log::warn!("heal: skipping manifest '{file_id}' after load error: {err}");
                continue;
            }
        };
        if manifest.chunks.iter().any(|c| c.chunk_id == chunk_id) {
            return Ok(Some((file_id, manifest)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_deduplicates() {
        let q = HealingQueue::new();
        q.enqueue("chunk_00000".into());
        q.enqueue("chunk_00000".into());
        q.enqueue("chunk_00001".into());
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn pop_respects_fifo_order_and_allows_requeue() {
        let q = HealingQueue::new();
        q.enqueue("a".into());
        q.enqueue("b".into());
        assert_eq!(q.pop().as_deref(), Some("a"));
        assert_eq!(q.pop().as_deref(), Some("b"));
        assert_eq!(q.pop(), None);

        // Once popped, the same id can be requeued.
        q.enqueue("a".into());
        assert_eq!(q.len(), 1);
    }
}
