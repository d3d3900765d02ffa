//! Chunk storage and the collaborators of the trove gateway.
//!
//! This crate provides:
//! - Content-addressed chunk stores (memory and filesystem)
//! - The content pipeline splitting streams into chunk trees and joining them back
//! - Manifest persistence with read-write and read-only views
//! - Feed lookups and sequence feed updates
//! - Postage admission, stamped putters and sync tracking
//! - Pins

pub mod backends;
pub mod error;
pub mod feeds;
pub mod file;
pub mod manifest;
pub mod pins;
pub mod postage;
pub mod traits;

pub use backends::{filesystem::FilesystemStore, memory::MemoryStore};
pub use error::{StorageError, StorageResult};
pub use feeds::{FeedPublisher, Lookup, LookupFactory, StoreLookupFactory};
pub use file::Joiner;
pub use manifest::{ManifestReader, ManifestWriter, StoreSizeFn};
pub use pins::PinStore;
pub use postage::{
    AdmissionError, AdmissionGate, BatchGate, BatchStore, LocalPusher, Pusher, StampedPutter,
    SyncError, SyncWaiter,
};
pub use traits::{ChunkStore, Putter, StorePutter};

use std::sync::Arc;
use trove_core::config::StorageConfig;

/// Create a chunk store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ChunkStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemStore::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
