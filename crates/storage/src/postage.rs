//! Postage admission: batch quotas, stamped putters and sync tracking.
//!
//! Every upload obtains a [`StampedPutter`] bound to a batch and a
//! [`SyncWaiter`]. The putter charges the batch per chunk and hands every
//! stored chunk to a [`Pusher`]; the waiter blocks until all pushes of that
//! upload have been acknowledged. Acknowledged pushes count towards the
//! upload's tag as `Synced`.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ChunkStore, Putter};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use trove_core::config::PostageConfig;
use trove_core::{BatchId, Chunk, Reference, Tag, TagCounter};
use uuid::Uuid;

/// Why an upload could not be admitted.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("batch {0} is not usable")]
    Unusable(BatchId),

    #[error("batch {0} not found")]
    NotFound(BatchId),

    #[error("invalid batch: {0}")]
    Invalid(String),
}

/// Why an upload's chunks could not be confirmed as propagated.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("timed out with {pending} chunks unacknowledged")]
    Timeout { pending: usize },

    #[error("push of chunk {address} failed: {reason}")]
    Push { address: Reference, reason: String },

    #[error("push task failed: {0}")]
    Task(String),
}

/// A payment-backed quota of chunks.
#[derive(Debug)]
pub struct Batch {
    id: BatchId,
    capacity: u64,
    used: AtomicU64,
    usable: AtomicBool,
}

impl Batch {
    pub fn new(id: BatchId, capacity: u64, usable: bool) -> Self {
        Self {
            id,
            capacity,
            used: AtomicU64::new(0),
            usable: AtomicBool::new(usable),
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn is_usable(&self) -> bool {
        self.usable.load(Ordering::Acquire)
    }

    pub fn set_usable(&self, usable: bool) {
        self.usable.store(usable, Ordering::Release);
    }

    /// Charge one chunk against the batch.
    pub fn stamp(&self) -> StorageResult<()> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.capacity).then_some(used + 1)
            })
            .map(|_| ())
            .map_err(|_| StorageError::QuotaExceeded(self.id.to_hex()))
    }

    pub fn info(&self) -> BatchInfo {
        BatchInfo {
            batch_id: self.id,
            capacity: self.capacity,
            used: self.used.load(Ordering::Acquire),
            usable: self.is_usable(),
        }
    }
}

/// Client view of a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchInfo {
    pub batch_id: BatchId,
    pub capacity: u64,
    pub used: u64,
    pub usable: bool,
}

/// All batches known to this node.
#[derive(Debug, Default)]
pub struct BatchStore {
    batches: DashMap<BatchId, Arc<Batch>>,
}

impl BatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &PostageConfig) -> StorageResult<Self> {
        config.validate().map_err(StorageError::Config)?;
        let store = Self::new();
        for batch in &config.batches {
            let id = BatchId::from_hex(&batch.id)?;
            store.insert(Batch::new(id, batch.capacity, batch.usable));
        }
        Ok(store)
    }

    pub fn insert(&self, batch: Batch) -> Arc<Batch> {
        let batch = Arc::new(batch);
        self.batches.insert(batch.id(), batch.clone());
        batch
    }

    /// Create a usable batch with a fresh random id.
    pub fn create(&self, capacity: u64) -> Arc<Batch> {
        let digest: [u8; 32] = Sha256::digest(Uuid::new_v4().as_bytes()).into();
        self.insert(Batch::new(BatchId::from_bytes(digest), capacity, true))
    }

    pub fn get(&self, id: &BatchId) -> Option<Arc<Batch>> {
        self.batches.get(id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<BatchInfo> {
        let mut batches: Vec<_> = self.batches.iter().map(|entry| entry.info()).collect();
        batches.sort_by_key(|info| info.batch_id);
        batches
    }
}

/// Propagates stored chunks to the rest of the network.
#[async_trait]
pub trait Pusher: Send + Sync + 'static {
    async fn push(&self, address: Reference) -> Result<(), SyncError>;
}

/// Pusher for a single-node deployment: local storage is the whole network.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalPusher;

#[async_trait]
impl Pusher for LocalPusher {
    async fn push(&self, _address: Reference) -> Result<(), SyncError> {
        Ok(())
    }
}

type PendingPushes = Arc<Mutex<JoinSet<Result<(), SyncError>>>>;

fn lock_pending(pending: &PendingPushes) -> MutexGuard<'_, JoinSet<Result<(), SyncError>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Putter bound to an optional batch that tracks pushes for its upload.
pub struct StampedPutter {
    store: Arc<dyn ChunkStore>,
    batch: Option<Arc<Batch>>,
    pusher: Arc<dyn Pusher>,
    pending: PendingPushes,
    tag: Option<Arc<Tag>>,
}

impl StampedPutter {
    pub fn batch(&self) -> Option<&Arc<Batch>> {
        self.batch.as_ref()
    }

    /// Count acknowledged pushes against `tag`.
    pub fn with_tag(mut self, tag: Arc<Tag>) -> Self {
        self.tag = Some(tag);
        self
    }
}

#[async_trait]
impl Putter for StampedPutter {
    async fn put(&self, chunk: Chunk) -> StorageResult<bool> {
        if let Some(batch) = &self.batch {
            batch.stamp()?;
        }
        let created = self.store.put(&chunk).await?;

        let pusher = self.pusher.clone();
        let tag = self.tag.clone();
        let address = chunk.address();
        lock_pending(&self.pending).spawn(async move {
            pusher.push(address).await?;
            if let Some(tag) = tag {
                tag.inc(TagCounter::Synced)
                    .map_err(|e| SyncError::Task(e.to_string()))?;
            }
            Ok(())
        });
        Ok(created)
    }
}

/// Waits until every chunk written through the paired putter is acknowledged.
pub struct SyncWaiter {
    pending: PendingPushes,
    timeout: Duration,
}

impl SyncWaiter {
    pub async fn wait(self) -> Result<(), SyncError> {
        let mut pushes = std::mem::take(&mut *lock_pending(&self.pending));
        let total = pushes.len();

        let drain = async {
            while let Some(joined) = pushes.join_next().await {
                joined.map_err(|e| SyncError::Task(e.to_string()))??;
            }
            Ok::<(), SyncError>(())
        };
        let outcome = tokio::time::timeout(self.timeout, drain).await;
        match outcome {
            Ok(result) => {
                if result.is_ok() {
                    debug!(chunks = total, "upload chunks synced");
                }
                result
            }
            Err(_) => {
                let pending = pushes.len();
                warn!(pending, total, "timed out waiting for chunks to sync");
                Err(SyncError::Timeout { pending })
            }
        }
    }
}

/// Validates payment context and hands out bound putters.
pub trait AdmissionGate: Send + Sync + 'static {
    /// `batch` is the raw batch id supplied by the client, if any.
    fn new_putter(&self, batch: Option<&str>) -> Result<(StampedPutter, SyncWaiter), AdmissionError>;
}

/// Admission gate over a [`BatchStore`].
pub struct BatchGate {
    store: Arc<dyn ChunkStore>,
    batches: Arc<BatchStore>,
    pusher: Arc<dyn Pusher>,
    require_batch: bool,
    sync_timeout: Duration,
}

impl BatchGate {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        batches: Arc<BatchStore>,
        pusher: Arc<dyn Pusher>,
        require_batch: bool,
        sync_timeout: Duration,
    ) -> Self {
        Self {
            store,
            batches,
            pusher,
            require_batch,
            sync_timeout,
        }
    }

    fn bind(&self, batch: Option<Arc<Batch>>) -> (StampedPutter, SyncWaiter) {
        let pending: PendingPushes = Arc::new(Mutex::new(JoinSet::new()));
        let putter = StampedPutter {
            store: self.store.clone(),
            batch,
            pusher: self.pusher.clone(),
            pending: pending.clone(),
            tag: None,
        };
        let waiter = SyncWaiter {
            pending,
            timeout: self.sync_timeout,
        };
        (putter, waiter)
    }
}

impl AdmissionGate for BatchGate {
    fn new_putter(&self, batch: Option<&str>) -> Result<(StampedPutter, SyncWaiter), AdmissionError> {
        let raw = batch.map(str::trim).filter(|s| !s.is_empty());
        let Some(raw) = raw else {
            if self.require_batch {
                return Err(AdmissionError::Invalid("postage batch id is required".to_string()));
            }
            return Ok(self.bind(None));
        };

        let id = BatchId::from_hex(raw).map_err(|e| AdmissionError::Invalid(e.to_string()))?;
        let batch = self.batches.get(&id).ok_or(AdmissionError::NotFound(id))?;
        if !batch.is_usable() {
            return Err(AdmissionError::Unusable(id));
        }
        Ok(self.bind(Some(batch)))
    }
}
