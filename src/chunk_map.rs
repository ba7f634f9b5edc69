//! In-memory cache for the legacy `/chunk/{chunk_id}` lookup and assignment
//! routes.
//!
//! `chunk_map` is a secondary, in-memory index from chunk id to the node ids
//! believed to hold it. It exists purely to serve the legacy lookup fast
//! without scanning every manifest; the manifest store on disk remains the
//! durable source of truth and is never driven from this cache.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct ChunkMap {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl ChunkMap {
    pub fn new() -> Self {
        ChunkMap {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records that `node_id` holds a replica of `chunk_id`, without
    /// duplicating an existing entry.
    pub fn record(&self, chunk_id: &str, node_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        let nodes = entries.entry(chunk_id.to_string()).or_default();
        if !nodes.iter().any(|n| n == node_id) {
            nodes.push(node_id.to_string());
        }
    }

    pub fn get(&self, chunk_id: &str) -> Option<Vec<String>> {
        self.entries.lock().unwrap().get(chunk_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_get_round_trips() {
        let map = ChunkMap::new();
        map.record("chunk_00000", "n1");
        map.record("chunk_00000", "n2");
        map.record("chunk_00000", "n1");

        assert_eq!(map.get("chunk_00000"), Some(vec!["n1".to_string(), "n2".to_string()]));
        assert_eq!(map.get("missing"), None);
    }
}
