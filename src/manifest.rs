//! Per-file manifest types and their encrypted, chunked on-disk store. Each
//! manifest is persisted as a sequence of fixed-size encrypted records
//! `{file_id}_manifest_chunk_{NNNN}.bin` in one directory, with all
//! mutating operations serialized through the store's own lock.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::crypto::{self, CryptoKey};
use crate::error::CoordinatorError;

/// One replicated slice of a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub chunk_id: String,
    pub node_ids: Vec<String>,
}

impl ChunkDescriptor {
    pub fn new(chunk_id: String) -> Self {
        ChunkDescriptor {
            chunk_id,
            node_ids: Vec::new(),
        }
    }

    /// Adds `node_id` if it is not already present; duplicates never
    /// appear in `node_ids`.
    pub fn add_replica(&mut self, node_id: String) {
        if !self.node_ids.contains(&node_id) {
            self.node_ids.push(node_id);
        }
    }
}

/// Per-file metadata: original name, ordered chunks, and the per-file data
/// key (base64). `degraded_chunks` records chunk ids that had zero
/// successful placements at upload time, so a partial upload stays visible
/// and recoverable instead of vanishing silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub original_filename: String,
    pub chunks: Vec<ChunkDescriptor>,
    pub encryption_key: String,
    #[serde(default)]
    pub degraded_chunks: Vec<String>,
}

impl Manifest {
    pub fn data_key(&self) -> Result<CryptoKey, CoordinatorError> {
        if self.encryption_key.is_empty() {
            return Err(CoordinatorError::KeyMissing(self.original_filename.clone()));
        }
        CryptoKey::from_base64(&self.encryption_key)
    }
}

/// Persists manifests as encrypted, chunked on-disk records, serializing all
/// mutating operations through a single `Mutex` (no per-`file_id` lock:
/// concurrent saves of the same `file_id` are totally ordered).
pub struct ManifestStore {
    dir: PathBuf,
    manifest_key: CryptoKey,
    record_size: usize,
    lock: Mutex<()>,
}

fn manifest_chunk_name(file_id: &str, index: usize) -> String {
    format!("{file_id}_manifest_chunk_{index:04}.bin")
}

impl ManifestStore {
    pub fn new(dir: PathBuf, manifest_key: CryptoKey, record_size: usize) -> Self {
        ManifestStore {
            dir,
            manifest_key,
            record_size,
            lock: Mutex::new(()),
        }
    }

    fn path_for(&self, file_id: &str, index: usize) -> PathBuf {
        self.dir.join(manifest_chunk_name(file_id, index))
    }

    /// Serializes, chunks, encrypts, and writes a manifest. Removes any
    /// stale record left over from a longer previous version, so a later
    /// `load` never reads trailing garbage from a shrunk manifest.
    pub async fn save(&self, file_id: &str, manifest: &Manifest) -> Result<(), CoordinatorError> {
        let _guard = self.lock.lock().await;
        self.save_locked(file_id, manifest).await
    }

    /// Semantically identical to `save` — a full replacement.
    pub async fn update(&self, file_id: &str, manifest: &Manifest) -> Result<(), CoordinatorError> {
        self.save(file_id, manifest).await
    }

    async fn save_locked(&self, file_id: &str, manifest: &Manifest) -> Result<(), CoordinatorError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let serialized = serde_json::to_vec(manifest)
            .map_err(|err| anyhow::anyhow!("manifest serialize failed: {err}"))?;

        let mut new_count = 0usize;
        for (index, block) in serialized.chunks(self.record_size).enumerate() {
            let ciphertext = crypto::encrypt(block, &self.manifest_key);
            tokio::fs::write(self.path_for(file_id, index), ciphertext).await?;
            new_count = index + 1;
        }
        // An empty manifest body still needs a record at index 0.
        if new_count == 0 {
            let ciphertext = crypto::encrypt(&[], &self.manifest_key);
            tokio::fs::write(self.path_for(file_id, 0), ciphertext).await?;
            new_count = 1;
        }

        // Remove any higher-indexed record left from a longer previous
        // version so `load` terminates correctly.
        let mut index = new_count;
        loop {
            let path = self.path_for(file_id, index);
            if tokio::fs::metadata(&path).await.is_err() {
                break;
            }
            tokio::fs::remove_file(&path).await?;
            index += 1;
        }

        Ok(())
    }

    /// Reads ascending record indices starting at 0, stopping at the first
    /// missing index; fails with `FileNotFound` if index 0 is absent, or
    /// `CorruptManifest` on decrypt/parse failure.
    pub async fn load(&self, file_id: &str) -> Result<Manifest, CoordinatorError> {
        let _guard = self.lock.lock().await;
        self.load_locked(file_id).await
    }

    async fn load_locked(&self, file_id: &str) -> Result<Manifest, CoordinatorError> {
        let mut plaintext = Vec::new();
        let mut index = 0usize;

        loop {
            let path = self.path_for(file_id, index);
            let ciphertext = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(_) if index == 0 => return Err(CoordinatorError::FileNotFound(file_id.to_string())),
                Err(_) => break,
            };

            let block = crypto::decrypt(&ciphertext, &self.manifest_key).map_err(|_| {
                CoordinatorError::CorruptManifest(
                    file_id.to_string(),
                    format!("decrypt failed at record {index}"),
                )
            })?;
            plaintext.extend_from_slice(&block);
            index += 1;
        }

        serde_json::from_slice(&plaintext).map_err(|err| {
            CoordinatorError::CorruptManifest(file_id.to_string(), format!("parse failed: {err}"))
        })
    }

    /// Removes every record for `file_id`.
    pub async fn delete(&self, file_id: &str) -> Result<(), CoordinatorError> {
        let _guard = self.lock.lock().await;
        let mut index = 0usize;
        loop {
            let path = self.path_for(file_id, index);
            if tokio::fs::remove_file(&path).await.is_err() {
                break;
            }
            index += 1;
        }
        Ok(())
    }

    /// Scans the manifest directory and returns the set of distinct
    /// `file_id`s, recovered by stripping the trailing
    /// `_manifest_chunk_NNNN.bin` suffix. `file_id`s containing underscores
    /// are handled correctly because we strip from the right.
    pub async fn list(&self) -> Result<Vec<String>, CoordinatorError> {
        let _guard = self.lock.lock().await;
        self.list_locked()
    }

    fn list_locked(&self) -> Result<Vec<String>, CoordinatorError> {
        let mut ids = BTreeSet::new();
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        for entry in walkdir::WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if let Some(file_id) = file_id_from_record_name(entry.file_name().to_string_lossy().as_ref()) {
                ids.insert(file_id);
            }
        }

        Ok(ids.into_iter().collect())
    }
}

fn file_id_from_record_name(name: &str) -> Option<String> {
    // Match "..._manifest_chunk_NNNN.bin" and strip that exact suffix,
    // regardless of how many underscores appear in the file_id itself.
    let suffix_start = name.rfind("_manifest_chunk_")?;
    let rest = &name[suffix_start + "_manifest_chunk_".len()..];
    if rest.len() != "NNNN.bin".len() {
        return None;
    }
    let (digits, ext) = rest.split_at(4);
    if ext != ".bin" || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(name[..suffix_start].to_string())
}
