//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use std::sync::Arc;
use trove_core::{Chunk, Reference};

/// Content-addressed chunk storage.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Check if a chunk exists.
    async fn has(&self, address: &Reference) -> StorageResult<bool>;

    /// Get a chunk. Missing chunks are `StorageError::NotFound`.
    async fn get(&self, address: &Reference) -> StorageResult<Chunk>;

    /// Store a chunk. Returns true if it was newly written, false if it
    /// was already present.
    async fn put(&self, chunk: &Chunk) -> StorageResult<bool>;

    /// Get the backend name for metrics/logging.
    fn backend_name(&self) -> &'static str;

    /// Check if the storage backend is healthy and accessible.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// have nothing to verify.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Write side of an upload: where the pipeline sends the chunks it produces.
#[async_trait]
pub trait Putter: Send + Sync {
    /// Store a chunk. Returns true if it was newly written.
    async fn put(&self, chunk: Chunk) -> StorageResult<bool>;
}

/// Putter writing straight to a store, without admission or sync tracking.
#[derive(Clone)]
pub struct StorePutter {
    store: Arc<dyn ChunkStore>,
}

impl StorePutter {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Putter for StorePutter {
    async fn put(&self, chunk: Chunk) -> StorageResult<bool> {
        self.store.put(&chunk).await
    }
}
