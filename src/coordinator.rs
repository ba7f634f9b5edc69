//! Wires the standalone modules into one running coordinator: directory
//! bootstrap, manifest key load-or-generate, and the background healing
//! worker.

use std::sync::Arc;

use crate::chunk_map::ChunkMap;
use crate::config::CoordinatorConfig;
use crate::crypto::CryptoKey;
use crate::healing::{self, HealingQueue};
use crate::manifest::ManifestStore;
use crate::node_client::NodeClient;
use crate::placement::PlacementEngine;
use crate::registry::NodeRegistry;
use crate::retrieval::RetrievalEngine;

pub struct Coordinator {
    pub config: CoordinatorConfig,
    pub registry: Arc<NodeRegistry>,
    pub manifest_store: Arc<ManifestStore>,
    pub healing_queue: Arc<HealingQueue>,
    pub chunk_map: Arc<ChunkMap>,
    pub node_client: Arc<NodeClient>,
    pub placement: PlacementEngine,
    pub retrieval: RetrievalEngine,
}

impl Coordinator {
    /// Bootstraps working directories, resolves the manifest encryption key
    /// (env/CLI override, else load-or-generate at `manifest_key_path()`),
    /// and constructs every subsystem. Does not yet spawn the healing
    /// worker — call `spawn_healing_worker` once the coordinator is kept
    /// alive for the process lifetime.
    pub async fn bootstrap(config: CoordinatorConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.work_dir).await?;
        tokio::fs::create_dir_all(config.manifests_dir()).await?;
        tokio::fs::create_dir_all(config.temp_uploads_dir()).await?;
        tokio::fs::create_dir_all(config.temp_chunks_dir()).await?;

        let manifest_key = Self::resolve_manifest_key(&config).await?;

        let registry = Arc::new(NodeRegistry::new(config.heartbeat_timeout));
        let manifest_store = Arc::new(ManifestStore::new(
            config.manifests_dir(),
            manifest_key,
            crate::config::MANIFEST_CHUNK_SIZE,
        ));
        let healing_queue = Arc::new(HealingQueue::new());
        let chunk_map = Arc::new(ChunkMap::new());
        let node_client = Arc::new(NodeClient::new(config.node_timeout));

        let placement = PlacementEngine::new(
            manifest_store.clone(),
            registry.clone(),
            node_client.clone(),
            chunk_map.clone(),
            config.redundancy,
            config.chunk_size,
        );
        let retrieval = RetrievalEngine::new(manifest_store.clone(), registry.clone(), node_client.clone());

        Ok(Coordinator {
            config,
            registry,
            manifest_store,
            healing_queue,
            chunk_map,
            node_client,
            placement,
            retrieval,
        })
    }

    /// `CHUNKVAULT_MANIFEST_KEY` (or `--manifest-key`) wins outright; else
    /// reuse `manifest.key` on disk; else mint and persist a fresh key.
    async fn resolve_manifest_key(config: &CoordinatorConfig) -> anyhow::Result<CryptoKey> {
        if let Some(encoded) = &config.manifest_key_override {
            return Ok(CryptoKey::from_base64(encoded)?);
        }

        let key_path = config.manifest_key_path();
        match tokio::fs::read_to_string(&key_path).await {
            Ok(encoded) => Ok(CryptoKey::from_base64(encoded.trim())?),
            Err(_) => {
                let key = crate::crypto::generate_key();
                tokio::fs::write(&key_path, key.to_base64()).await?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600)).await?;
                }
                log::info!("generated new manifest key at '{}'", key_path.display());
                Ok(key)
            }
        }
    }

    /// Spawns the single long-running healing worker task.
    pub fn spawn_healing_worker(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.healing_queue.clone();
        let manifest_store = self.manifest_store.clone();
        let registry = self.registry.clone();
        let node_client = self.node_client.clone();
        let chunk_map = self.chunk_map.clone();
        let redundancy = self.config.redundancy;
        let idle_sleep = self.config.heal_idle_sleep;

        tokio::spawn(async move {
            healing::run(queue, manifest_store, registry, node_client, chunk_map, redundancy, idle_sleep).await;
        })
    }

    /// Evicts `node_id` from every manifest's chunk descriptors and enqueues
    /// any chunk that drops below redundancy as a result. Called by the HTTP
    /// layer whenever a `heartbeat` sweep reports an eviction.
    pub async fn handle_node_death(&self, node_id: &str) {
        if let Err(err) = crate::registry::mark_dead(
            node_id,
            &self.manifest_store,
            self.config.redundancy,
            &self.healing_queue,
        )
        .await
        {
            log::error!("mark_dead for '{node_id}' failed: {err}");
        }
    }
}
