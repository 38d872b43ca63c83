use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use ferryman_store::StoreConfig;

/// Engine default chunk size when configuration supplies none: 1 MiB.
///
/// Configuration files typically express `chunk_size_mb` (default 10); the
/// loader multiplies that out before handing the engine this value.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Typed configuration consumed by [`TransferManager`](crate::TransferManager).
///
/// Loading (file parsing, environment) is the caller's concern; the engine
/// only sees this value object. The chunk size, retry budget, and concurrency
/// ceiling are captured per task at creation time, so changing them later
/// affects new tasks only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Nominal chunk size in bytes.
    pub chunk_size: u64,
    /// Configured transfer-concurrency ceiling. Reported in statistics; the
    /// worker thread count is the effective bound.
    pub max_concurrent_transfers: u32,
    /// Worker threads consuming the task queue.
    pub worker_threads: usize,
    /// Chunk retry budget; a chunk is attempted `max_retries + 1` times.
    pub max_retries: u32,
    /// Per-task inactivity timeout reported in statistics.
    pub timeout_seconds: u64,
    /// Supervisor heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Age after which a silent DOWNLOADING task is considered a zombie.
    pub zombie_timeout: Duration,
    /// When false, chunk and final MD5 verification are skipped (size checks
    /// still apply).
    pub enable_integrity_check: bool,
    /// Durable store settings.
    pub store: StoreConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_transfers: 2,
            worker_threads: 4,
            max_retries: 3,
            timeout_seconds: 300,
            heartbeat_interval: Duration::from_secs(30),
            zombie_timeout: Duration::from_secs(30 * 60),
            enable_integrity_check: true,
            store: StoreConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_documentation() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert_eq!(config.max_concurrent_transfers, 2);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout_seconds, 300);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.zombie_timeout, Duration::from_secs(1800));
        assert!(config.enable_integrity_check);
        assert_eq!(config.store.busy_timeout_ms, 30_000);
        assert_eq!(config.store.max_retry_attempts, 3);
        assert_eq!(config.store.retry_delay, Duration::from_secs(1));
    }
}
