//! In-memory chunk store.

use crate::error::{StorageError, StorageResult};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use trove_core::{Chunk, Reference};

/// Chunk store backed by a concurrent map. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    chunks: DashMap<Reference, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn has(&self, address: &Reference) -> StorageResult<bool> {
        Ok(self.chunks.contains_key(address))
    }

    async fn get(&self, address: &Reference) -> StorageResult<Chunk> {
        let data = self
            .chunks
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(address.to_hex()))?;
        Ok(Chunk::from_parts(*address, data)?)
    }

    async fn put(&self, chunk: &Chunk) -> StorageResult<bool> {
        let previous = self.chunks.insert(chunk.address(), chunk.data().clone());
        Ok(previous.is_none_or(|existing| existing != *chunk.data()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::new();
        let chunk = Chunk::content(2, b"hi").unwrap();

        assert!(store.put(&chunk).await.unwrap());
        assert!(!store.put(&chunk).await.unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&chunk.address()).await.unwrap(), chunk);
        assert!(!store.is_empty());

        let missing = Reference::compute(b"missing");
        assert!(store.get(&missing).await.unwrap_err().is_not_found());
    }
}
