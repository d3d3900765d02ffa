//! Feed lookups and updates.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ChunkStore, Putter};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use trove_core::{Chunk, Feed, FeedIndex, FeedType, FeedUpdate};

/// Finds feed updates by time.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// The most recent update published at or before `at` (unix seconds).
    ///
    /// `after` is a hint: an index known to exist, used as the search start.
    /// Returns `None` when the feed has no such update.
    async fn at(&self, at: i64, after: u64) -> StorageResult<Option<(Chunk, FeedIndex)>>;
}

/// Creates lookups for feed identities.
pub trait LookupFactory: Send + Sync + 'static {
    fn new_lookup(&self, feed: &Feed) -> StorageResult<Box<dyn Lookup>>;
}

/// Lookup factory reading update chunks from a chunk store.
#[derive(Clone)]
pub struct StoreLookupFactory {
    store: Arc<dyn ChunkStore>,
}

impl StoreLookupFactory {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }
}

impl LookupFactory for StoreLookupFactory {
    fn new_lookup(&self, feed: &Feed) -> StorageResult<Box<dyn Lookup>> {
        match feed.kind {
            FeedType::Sequence => Ok(Box::new(SequenceLookup::new(self.store.clone(), *feed))),
            FeedType::Epoch => Err(StorageError::Unsupported(
                "epoch feeds are not supported".to_string(),
            )),
        }
    }
}

/// Lookup over a sequence feed, whose updates live at consecutive indexes.
pub struct SequenceLookup {
    store: Arc<dyn ChunkStore>,
    feed: Feed,
}

impl SequenceLookup {
    pub fn new(store: Arc<dyn ChunkStore>, feed: Feed) -> Self {
        Self { store, feed }
    }

    async fn exists(&self, index: u64) -> StorageResult<bool> {
        self.store
            .has(&self.feed.update_address(FeedIndex(index)))
            .await
    }

    /// Highest index with an update, probing from `hint`.
    pub async fn latest_index(&self, hint: u64) -> StorageResult<Option<FeedIndex>> {
        let mut low = if hint > 0 && self.exists(hint).await? {
            hint
        } else if self.exists(0).await? {
            0
        } else {
            return Ok(None);
        };

        // Double the step until an index is missing, then bisect.
        let mut step = 1u64;
        let mut high = loop {
            let candidate = low.saturating_add(step);
            if candidate == low || !self.exists(candidate).await? {
                break candidate;
            }
            low = candidate;
            step = step.saturating_mul(2);
        };
        while high - low > 1 {
            let mid = low + (high - low) / 2;
            if self.exists(mid).await? {
                low = mid;
            } else {
                high = mid;
            }
        }
        Ok(Some(FeedIndex(low)))
    }
}

#[async_trait]
impl Lookup for SequenceLookup {
    async fn at(&self, at: i64, after: u64) -> StorageResult<Option<(Chunk, FeedIndex)>> {
        let Some(latest) = self.latest_index(after).await? else {
            return Ok(None);
        };

        let mut index = latest.0;
        loop {
            let chunk = self
                .store
                .get(&self.feed.update_address(FeedIndex(index)))
                .await?;
            match FeedUpdate::from_chunk(&chunk) {
                Ok(update) if update.timestamp > at => {}
                // Undecodable updates are returned for the caller to report.
                _ => return Ok(Some((chunk, FeedIndex(index)))),
            }
            if index == 0 {
                debug!(feed = ?self.feed, at, "all feed updates are newer than requested time");
                return Ok(None);
            }
            index -= 1;
        }
    }
}

/// Publishes updates to sequence feeds.
///
/// Publishes to the same feed are serialized, so every update lands at its
/// own index.
pub struct FeedPublisher {
    store: Arc<dyn ChunkStore>,
    locks: DashMap<Feed, Arc<Mutex<()>>>,
}

impl FeedPublisher {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Publish `update` at the next free index of a sequence feed.
    pub async fn publish(
        &self,
        putter: &dyn Putter,
        feed: &Feed,
        update: FeedUpdate,
    ) -> StorageResult<FeedIndex> {
        if feed.kind != FeedType::Sequence {
            return Err(StorageError::Unsupported(format!(
                "cannot publish to {} feeds",
                feed.kind
            )));
        }
        let lock = self.locks.entry(*feed).or_default().clone();
        let _guard = lock.lock().await;

        let lookup = SequenceLookup::new(self.store.clone(), *feed);
        let index = match lookup.latest_index(0).await? {
            Some(latest) => latest.next(),
            None => FeedIndex(0),
        };
        putter.put(update.to_chunk(feed, index)).await?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryStore;
    use crate::traits::StorePutter;
    use trove_core::Reference;

    fn feed(kind: FeedType) -> Feed {
        Feed::new([0xaa; 20], [0xbb; 32], kind)
    }

    async fn publish_many(store: &Arc<dyn ChunkStore>, count: u64) -> Vec<Reference> {
        let publisher = FeedPublisher::new(store.clone());
        let putter = StorePutter::new(store.clone());
        let mut targets = Vec::new();
        for i in 0..count {
            let target = Reference::compute(&i.to_be_bytes());
            let update = FeedUpdate::new(1_000 + i as i64 * 10, target);
            let index = publisher
                .publish(&putter, &feed(FeedType::Sequence), update)
                .await
                .unwrap();
            assert_eq!(index, FeedIndex(i));
            targets.push(target);
        }
        targets
    }

    #[tokio::test]
    async fn test_latest_update_found() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let targets = publish_many(&store, 37).await;

        let lookup = StoreLookupFactory::new(store.clone())
            .new_lookup(&feed(FeedType::Sequence))
            .unwrap();
        let (chunk, index) = lookup.at(i64::MAX, 0).await.unwrap().unwrap();
        assert_eq!(index, FeedIndex(36));
        assert_eq!(FeedUpdate::from_chunk(&chunk).unwrap().target, targets[36]);
    }

    #[tokio::test]
    async fn test_lookup_respects_timestamp() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let targets = publish_many(&store, 5).await;
        let lookup = SequenceLookup::new(store.clone(), feed(FeedType::Sequence));

        let (chunk, index) = lookup.at(1_025, 0).await.unwrap().unwrap();
        assert_eq!(index, FeedIndex(2));
        assert_eq!(FeedUpdate::from_chunk(&chunk).unwrap().target, targets[2]);

        assert!(lookup.at(999, 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_feed_has_no_update() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let lookup = SequenceLookup::new(store, feed(FeedType::Sequence));
        assert!(lookup.at(i64::MAX, 0).await.unwrap().is_none());
        assert_eq!(lookup.latest_index(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hint_beyond_latest_falls_back() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        publish_many(&store, 3).await;
        let lookup = SequenceLookup::new(store, feed(FeedType::Sequence));
        assert_eq!(lookup.latest_index(10).await.unwrap(), Some(FeedIndex(2)));
        assert_eq!(lookup.latest_index(1).await.unwrap(), Some(FeedIndex(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_get_distinct_indexes() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let publisher = Arc::new(FeedPublisher::new(store.clone()));

        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let publisher = publisher.clone();
                let putter = StorePutter::new(store.clone());
                tokio::spawn(async move {
                    let update = FeedUpdate::new(1_000, Reference::compute(&i.to_be_bytes()));
                    publisher
                        .publish(&putter, &feed(FeedType::Sequence), update)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut indexes = Vec::new();
        for handle in handles {
            indexes.push(handle.await.unwrap().0);
        }
        indexes.sort_unstable();
        assert_eq!(indexes, (0..8).collect::<Vec<_>>());

        let lookup = SequenceLookup::new(store, feed(FeedType::Sequence));
        assert_eq!(lookup.latest_index(0).await.unwrap(), Some(FeedIndex(7)));
    }

    #[tokio::test]
    async fn test_publish_to_epoch_feed_rejected() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let publisher = FeedPublisher::new(store.clone());
        let update = FeedUpdate::new(1_000, Reference::compute(b"x"));
        let result = publisher
            .publish(&StorePutter::new(store), &feed(FeedType::Epoch), update)
            .await;
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }

    #[test]
    fn test_epoch_feeds_unsupported() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let result = StoreLookupFactory::new(store).new_lookup(&feed(FeedType::Epoch));
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }
}
