//! CLI flag / environment variable configuration. This stays a thin
//! `clap`-derived struct rather than a heavyweight section-file config
//! system, since the coordinator only has a handful of knobs.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default redundancy factor: target replica count per chunk.
pub const DEFAULT_CHUNK_REDUNDANCY: usize = 3;
/// Fixed chunk size used when splitting uploaded files, in bytes.
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 100 * 1024;
/// Seconds of heartbeat silence after which a node is considered dead.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
/// Plaintext bytes per on-disk manifest record.
pub const MANIFEST_CHUNK_SIZE: usize = 4096;
/// Healing worker idle poll interval.
pub const DEFAULT_HEAL_IDLE_SLEEP: Duration = Duration::from_secs(5);
/// Bounded timeout for outbound node calls.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug, Clone)]
#[command(name = "chunkvault-coordinatord", about = "Chunkvault distributed object store coordinator")]
pub struct Cli {
    /// Address to bind the HTTP surface to.
    #[arg(long, env = "CHUNKVAULT_BIND_ADDR", default_value = "127.0.0.1:8008")]
    pub bind_addr: String,

    /// Root directory for manifests and scratch space.
    #[arg(long, env = "CHUNKVAULT_WORK_DIR", default_value = "./chunkvault-data")]
    pub work_dir: PathBuf,

    /// Target replica count per chunk.
    #[arg(long, env = "CHUNKVAULT_REDUNDANCY", default_value_t = DEFAULT_CHUNK_REDUNDANCY)]
    pub redundancy: usize,

    /// Fixed chunk size in bytes used when splitting uploaded files.
    #[arg(long, env = "CHUNKVAULT_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE_BYTES)]
    pub chunk_size: usize,

    /// Seconds of heartbeat silence after which a node is considered dead.
    #[arg(long, env = "CHUNKVAULT_HEARTBEAT_TIMEOUT_SECS", default_value_t = 30)]
    pub heartbeat_timeout_secs: u64,

    /// Seconds the healing worker sleeps when its queue is empty.
    #[arg(long, env = "CHUNKVAULT_HEAL_IDLE_SLEEP_SECS", default_value_t = 5)]
    pub heal_idle_sleep_secs: u64,

    /// Base64-encoded 32-byte manifest key, overriding the on-disk key file.
    #[arg(long, env = "CHUNKVAULT_MANIFEST_KEY")]
    pub manifest_key: Option<String>,
}

/// Fully resolved runtime configuration, derived from `Cli`.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind_addr: String,
    pub work_dir: PathBuf,
    pub redundancy: usize,
    pub chunk_size: usize,
    pub heartbeat_timeout: Duration,
    pub heal_idle_sleep: Duration,
    pub node_timeout: Duration,
    pub manifest_key_override: Option<String>,
}

impl From<Cli> for CoordinatorConfig {
    fn from(cli: Cli) -> Self {
        CoordinatorConfig {
            bind_addr: cli.bind_addr,
            work_dir: cli.work_dir,
            redundancy: cli.redundancy,
            chunk_size: cli.chunk_size,
            heartbeat_timeout: Duration::from_secs(cli.heartbeat_timeout_secs),
            heal_idle_sleep: Duration::from_secs(cli.heal_idle_sleep_secs),
            node_timeout: DEFAULT_NODE_TIMEOUT,
            manifest_key_override: cli.manifest_key,
        }
    }
}

impl CoordinatorConfig {
    pub fn manifests_dir(&self) -> PathBuf {
        self.work_dir.join("manifests")
    }

    pub fn temp_uploads_dir(&self) -> PathBuf {
        self.work_dir.join("temp_uploads")
    }

    pub fn temp_chunks_dir(&self) -> PathBuf {
        self.work_dir.join("temp_chunks")
    }

    pub fn manifest_key_path(&self) -> PathBuf {
        self.work_dir.join("manifest.key")
    }

    #[cfg(test)]
    pub fn for_test(work_dir: PathBuf) -> Self {
        CoordinatorConfig {
            bind_addr: "127.0.0.1:0".into(),
            work_dir,
            redundancy: DEFAULT_CHUNK_REDUNDANCY,
            chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            heal_idle_sleep: Duration::from_millis(50),
            node_timeout: DEFAULT_NODE_TIMEOUT,
            manifest_key_override: None,
        }
    }
}
