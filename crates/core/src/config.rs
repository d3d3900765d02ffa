//! Configuration types shared across crates.

use crate::postage::BatchId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:1633").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted upload body in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// How long an upload waits for its chunks to be acknowledged.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "0.0.0.0:1633".to_string()
}

fn default_max_upload_size() -> u64 {
    1024 * 1024 * 1024
}

fn default_sync_timeout_secs() -> u64 {
    60
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_size: default_max_upload_size(),
            sync_timeout_secs: default_sync_timeout_secs(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sync_timeout_secs == 0 {
            return Err("server.sync_timeout_secs must be at least 1".to_string());
        }
        if self.max_upload_size == 0 {
            return Err("server.max_upload_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Chunk storage backend configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-process storage, lost on restart.
    #[default]
    Memory,
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("storage.path must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// A postage batch preloaded at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Batch id as 64 hex characters.
    pub id: String,
    /// Number of chunks the batch may stamp.
    pub capacity: u64,
    #[serde(default = "default_usable")]
    pub usable: bool,
}

fn default_usable() -> bool {
    true
}

/// Postage admission configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PostageConfig {
    /// Reject uploads that do not name a batch.
    #[serde(default)]
    pub require_batch: bool,
    #[serde(default)]
    pub batches: Vec<BatchConfig>,
}

impl PostageConfig {
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for batch in &self.batches {
            let id = BatchId::from_hex(&batch.id)
                .map_err(|e| format!("postage.batches: {e}"))?;
            if !seen.insert(id) {
                return Err(format!("postage.batches: duplicate batch id {id}"));
            }
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub postage: PostageConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses in-memory storage and does not require
    /// a postage batch.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                sync_timeout_secs: 5,
                ..ServerConfig::default()
            },
            storage: StorageConfig::Memory,
            postage: PostageConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.postage.validate()
    }
}
