//! Download path: reassemble a file from its manifest and live replicas.
//! Walks each chunk's recorded replicas in manifest order, trying the next
//! one whenever a fetch or decrypt fails, and fails the whole download only
//! once every replica of some chunk is exhausted.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::CoordinatorConfig;
use crate::crypto;
use crate::error::CoordinatorError;
use crate::manifest::ManifestStore;
use crate::node_client::NodeClient;
use crate::registry::NodeRegistry;

pub struct RetrievalEngine {
    manifest_store: Arc<ManifestStore>,
    registry: Arc<NodeRegistry>,
    node_client: Arc<NodeClient>,
}

impl RetrievalEngine {
    pub fn new(
        manifest_store: Arc<ManifestStore>,
        registry: Arc<NodeRegistry>,
        node_client: Arc<NodeClient>,
    ) -> Self {
        RetrievalEngine {
            manifest_store,
            registry,
            node_client,
        }
    }

    /// Reconstructs `file_id`'s plaintext into a fresh file under
    /// `config.temp_chunks_dir()` and returns the path, the cleanup of which
    /// is the caller's responsibility (see `TempFileGuard`).
    pub async fn retrieve_file(
        &self,
        file_id: &str,
        config: &CoordinatorConfig,
    ) -> Result<(PathBuf, String), CoordinatorError> {
        let manifest = self.manifest_store.load(file_id).await?;
        let data_key = manifest.data_key()?;

        let mut assembled = Vec::new();
        for descriptor in &manifest.chunks {
            let plaintext = self.fetch_chunk_plaintext(&descriptor.chunk_id, &descriptor.node_ids, &data_key).await?;
            assembled.push(plaintext);
        }

        tokio::fs::create_dir_all(config.temp_chunks_dir()).await?;
        let output_path = config.temp_chunks_dir().join(file_id);
        let joined: Vec<u8> = assembled.into_iter().flatten().collect();
        tokio::fs::write(&output_path, joined).await?;

        Ok((output_path, manifest.original_filename))
    }

    /// Walks `node_ids` in manifest order, returning the first replica that
    /// both fetches and decrypts cleanly.
    async fn fetch_chunk_plaintext(
        &self,
        chunk_id: &str,
        node_ids: &[String],
        data_key: &crypto::CryptoKey,
    ) -> Result<Vec<u8>, CoordinatorError> {
        for node_id in node_ids {
            let Some(record) = self.registry.get(node_id) else {
                continue;
            };
            let ciphertext = match self.node_client.get_chunk(&record.endpoint(), chunk_id).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::warn!("download of '{chunk_id}' from '{node_id}' failed: {err}");
                    continue;
                }
            };
            match crypto::decrypt(&ciphertext, data_key) {
                Ok(plaintext) => return Ok(plaintext),
                Err(err) => {
                    log::warn!("decrypting '{chunk_id}' from '{node_id}' failed: {err}");
                    continue;
                }
            }
        }
        Err(CoordinatorError::ChunkUnavailable(chunk_id.to_string()))
    }
}

/// Deletes the wrapped path on drop, whether or not the request handler that
/// produced it returns successfully.
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    pub fn new(path: PathBuf) -> Self {
        TempFileGuard { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to clean up temp file '{}': {err}", self.path.display());
            }
        }
    }
}
