//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Locking configuration
    pub locking: LockConfig,

    /// Idempotency cache configuration
    pub idempotency: IdempotencyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDbConfig::default(),
            locking: LockConfig::default(),
            idempotency: IdempotencyConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Level 0 file num compaction trigger
    pub level0_file_num_compaction_trigger: i32,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            level0_file_num_compaction_trigger: 4,
        }
    }
}

/// Account lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Maximum time to wait for an account lock (milliseconds)
    pub wait_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5_000,
        }
    }
}

/// Idempotency cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Default record lifetime (seconds)
    pub default_ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("LEDGER_LOCK_WAIT_MS") {
            config.locking.wait_timeout_ms = timeout
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid LEDGER_LOCK_WAIT_MS: {}", timeout)))?;
        }

        if let Ok(ttl) = std::env::var("LEDGER_IDEMPOTENCY_TTL_SECS") {
            config.idempotency.default_ttl_secs = ttl
                .parse()
                .map_err(|_| crate::Error::Config(format!("Invalid LEDGER_IDEMPOTENCY_TTL_SECS: {}", ttl)))?;
        }

        Ok(config)
    }
}
