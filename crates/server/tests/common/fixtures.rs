//! Test fixtures for generating test data.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::Semaphore;
use trove_core::Reference;
use trove_storage::{Pusher, SyncError};

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Pusher that rejects every chunk.
#[allow(dead_code)]
pub struct FailingPusher;

#[async_trait]
impl Pusher for FailingPusher {
    async fn push(&self, address: Reference) -> Result<(), SyncError> {
        Err(SyncError::Push {
            address,
            reason: "no peers".to_string(),
        })
    }
}

/// Pusher that holds every push until released.
#[allow(dead_code)]
pub struct GatedPusher {
    gate: Arc<Semaphore>,
}

#[allow(dead_code)]
impl GatedPusher {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let all current and future pushes complete.
    pub fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl Pusher for GatedPusher {
    async fn push(&self, _address: Reference) -> Result<(), SyncError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?;
        Ok(())
    }
}
