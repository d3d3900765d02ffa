use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;
use trove_core::{Chunk, Reference};
use trove_storage::error::StorageResult;
use trove_storage::{ChunkStore, MemoryStore};

/// Memory store that counts reads and can delay them, for tests that need
/// to observe how much work a reader performs.
#[allow(dead_code)]
pub struct InstrumentedStore {
    inner: MemoryStore,
    pub gets: Arc<AtomicUsize>,
    get_delay: Option<Duration>,
}

#[allow(dead_code)]
impl InstrumentedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            gets: Arc::new(AtomicUsize::new(0)),
            get_delay: None,
        }
    }

    pub fn with_get_delay(mut self, delay: Duration) -> Self {
        self.get_delay = Some(delay);
        self
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkStore for InstrumentedStore {
    async fn has(&self, address: &Reference) -> StorageResult<bool> {
        self.inner.has(address).await
    }

    async fn get(&self, address: &Reference) -> StorageResult<Chunk> {
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(address).await
    }

    async fn put(&self, chunk: &Chunk) -> StorageResult<bool> {
        self.inner.put(chunk).await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}
