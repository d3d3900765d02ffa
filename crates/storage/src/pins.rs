//! Pins: references the node promises to keep.

use crate::error::{StorageError, StorageResult};
use crate::traits::ChunkStore;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use trove_core::Reference;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Pin {
    pub reference: Reference,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// In-memory pin set.
pub struct PinStore {
    store: Arc<dyn ChunkStore>,
    pins: DashMap<Reference, OffsetDateTime>,
}

impl PinStore {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self {
            store,
            pins: DashMap::new(),
        }
    }

    /// Pin a reference whose root chunk is present locally. Pinning twice is a no-op.
    pub async fn create_pin(&self, reference: Reference) -> StorageResult<()> {
        if !self.store.has(&reference).await? {
            return Err(StorageError::NotFound(reference.to_hex()));
        }
        self.pins
            .entry(reference)
            .or_insert_with(OffsetDateTime::now_utc);
        Ok(())
    }

    pub fn has_pin(&self, reference: &Reference) -> bool {
        self.pins.contains_key(reference)
    }

    pub fn get(&self, reference: &Reference) -> Option<Pin> {
        self.pins.get(reference).map(|entry| Pin {
            reference: *entry.key(),
            created_at: *entry.value(),
        })
    }

    pub fn remove(&self, reference: &Reference) -> StorageResult<()> {
        self.pins
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(reference.to_hex()))
    }

    pub fn list(&self) -> Vec<Pin> {
        let mut pins: Vec<_> = self
            .pins
            .iter()
            .map(|entry| Pin {
                reference: *entry.key(),
                created_at: *entry.value(),
            })
            .collect();
        pins.sort_by_key(|pin| pin.reference);
        pins
    }
}
