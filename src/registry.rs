//! Node membership and liveness tracking: a single mutex-guarded map,
//! refresh-then-sweep ordering on heartbeat (never evicting the very caller
//! that just checked in), and dead node eviction feeding chunk healing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::CoordinatorError;
use crate::manifest::ManifestStore;

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub host: String,
    pub port: u16,
    pub storage_available: u64,
    pub last_seen: Instant,
}

impl NodeRecord {
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, NodeRecord>>,
    heartbeat_timeout: Duration,
}

impl NodeRegistry {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        NodeRegistry {
            nodes: Mutex::new(HashMap::new()),
            heartbeat_timeout,
        }
    }

    /// Upsert a node, refreshing its endpoint and `last_seen`.
    pub fn register(&self, node_id: &str, host: String, port: u16, storage_available: u64) {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.insert(
            node_id.to_string(),
            NodeRecord {
                host,
                port,
                storage_available,
                last_seen: Instant::now(),
            },
        );
        log::info!("node '{node_id}' registered");
    }

    /// Refreshes `last_seen` for a known node, then sweeps dead nodes. A
    /// ghost node (unknown id) must re-register.
    ///
    /// Returns the ids of any nodes the subsequent sweep evicted, so the
    /// caller can drive the (async) chunk-healing fan-out without this
    /// method itself needing to be async.
    pub fn heartbeat(&self, node_id: &str) -> Result<Vec<String>, CoordinatorError> {
        {
            let mut nodes = self.nodes.lock().unwrap();
            match nodes.get_mut(node_id) {
                Some(record) => record.last_seen = Instant::now(),
                None => return Err(CoordinatorError::UnknownNode(node_id.to_string())),
            }
        }
        Ok(self.sweep())
    }

    /// Evicts and returns the ids of every node whose `last_seen` exceeds
    /// `heartbeat_timeout`.
    pub fn sweep(&self) -> Vec<String> {
        let dead: Vec<String> = {
            let nodes = self.nodes.lock().unwrap();
            let now = Instant::now();
            nodes
                .iter()
                .filter(|(_, r)| now.duration_since(r.last_seen) > self.heartbeat_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for node_id in &dead {
            self.nodes.lock().unwrap().remove(node_id);
            log::warn!("node '{node_id}' evicted after heartbeat timeout");
        }
        dead
    }

    /// A consistent snapshot of currently-live node ids and records.
    pub fn snapshot(&self) -> HashMap<String, NodeRecord> {
        self.nodes.lock().unwrap().clone()
    }

    pub fn is_live(&self, node_id: &str) -> bool {
        self.nodes.lock().unwrap().contains_key(node_id)
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes.lock().unwrap().get(node_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes `node_id` from every chunk descriptor across every manifest,
/// enqueuing any chunk that drops below the redundancy target for healing.
/// A manifest that disappears mid-scan (benign race with deletion) is
/// skipped silently.
pub async fn mark_dead(
    node_id: &str,
    manifest_store: &ManifestStore,
    redundancy: usize,
    healing_queue: &crate::healing::HealingQueue,
) -> anyhow::Result<()> {
    for file_id in manifest_store.list().await? {
        let mut manifest = match manifest_store.load(&file_id).await {
            Ok(m) => m,
            Err(CoordinatorError::FileNotFound(_)) => continue,
            Err(err) => {
                log::warn!("mark_dead: skipping '{file_id}' after load error: {err}");
                continue;
            }
        };

        let mut changed = false;
        for chunk in manifest.chunks.iter_mut() {
            if let Some(pos) = chunk.node_ids.iter().position(|n| n == node_id) {
                chunk.node_ids.remove(pos);
                changed = true;
                if chunk.node_ids.len() < redundancy {
                    healing_queue.enqueue(chunk.chunk_id.clone());
                }
            }
        }

        if changed {
            manifest_store.update(&file_id, &manifest).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_snapshot() {
        let reg = NodeRegistry::new(Duration::from_secs(30));
        reg.register("n1", "10.0.0.1".into(), 9000, 2048);
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap["n1"].port, 9000);
    }

    #[test]
    fn heartbeat_unknown_node_fails() {
        let reg = NodeRegistry::new(Duration::from_secs(30));
        let result = reg.heartbeat("ghost");
        assert!(matches!(result, Err(CoordinatorError::UnknownNode(_))));
    }

    #[test]
    fn heartbeat_refreshes_before_sweep_never_evicts_caller() {
        // heartbeat_timeout of 0 means any node would be "expired" on a
        // sweep that ran before the refresh; the implementation must
        // refresh first so the caller survives.
        let reg = NodeRegistry::new(Duration::from_secs(0));
        reg.register("n1", "10.0.0.1".into(), 9000, 2048);
        let evicted = reg.heartbeat("n1").unwrap();
        assert!(reg.is_live("n1"));
        assert!(evicted.is_empty());
    }

    #[test]
    fn sweep_evicts_stale_nodes_and_calls_back() {
        let reg = NodeRegistry::new(Duration::from_millis(10));
        reg.register("n1", "10.0.0.1".into(), 9000, 2048);
        std::thread::sleep(Duration::from_millis(30));
        let evicted = reg.sweep();
        assert!(!reg.is_live("n1"));
        assert_eq!(evicted, vec!["n1".to_string()]);
    }

    #[test]
    fn fresh_heartbeats_survive_timeout_window() {
        let reg = NodeRegistry::new(Duration::from_millis(50));
        reg.register("n1", "10.0.0.1".into(), 9000, 2048);
        for _ in 0..3 {
            std::thread::sleep(Duration::from_millis(20));
            reg.heartbeat("n1").unwrap();
        }
        assert!(reg.is_live("n1"));
    }
}
