//! Upload progress tags.
//!
//! A tag correlates the chunks an upload is expected to produce with the
//! chunks actually split, stored and synced. Tags are shared across the
//! stages of one upload and across uploads that reuse a client-supplied id,
//! so every mutation goes through [`Tag::inc_n`] or [`Tag::done_split`].

use crate::reference::Reference;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use time::OffsetDateTime;

/// Identifier of an upload tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(pub u32);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TagId {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, TagError> {
        s.trim()
            .parse::<u32>()
            .map(TagId)
            .map_err(|_| TagError::InvalidId(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagCounter {
    /// Chunks the upload is expected to produce.
    Total,
    /// Chunks produced by the splitter.
    Split,
    /// Chunks that were already present in the store.
    Seen,
    /// Chunks newly written to the store.
    Stored,
    /// Chunks acknowledged by the pusher.
    Synced,
}

#[derive(Debug, Error)]
pub enum TagError {
    #[error("tag not found: {0}")]
    NotFound(TagId),

    #[error("invalid tag id: {0}")]
    InvalidId(String),

    #[error("tag {0} is already done")]
    AlreadyDone(TagId),

    #[error("tag {id} counter {counter:?} overflowed")]
    Overflow { id: TagId, counter: TagCounter },
}

#[derive(Debug, Default)]
struct SplitState {
    total: u64,
    split: u64,
    address: Option<Reference>,
}

/// Progress counters for one upload.
#[derive(Debug)]
pub struct Tag {
    id: TagId,
    started_at: OffsetDateTime,
    split: Mutex<SplitState>,
    seen: AtomicU64,
    stored: AtomicU64,
    synced: AtomicU64,
}

impl Tag {
    pub fn new(id: TagId) -> Self {
        Self {
            id,
            started_at: OffsetDateTime::now_utc(),
            split: Mutex::new(SplitState::default()),
            seen: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            synced: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn inc(&self, counter: TagCounter) -> Result<u64, TagError> {
        self.inc_n(counter, 1)
    }

    /// Add `n` to a counter and return the new value.
    ///
    /// `Total` and `Split` are frozen once the split is done.
    pub fn inc_n(&self, counter: TagCounter, n: u64) -> Result<u64, TagError> {
        let overflow = TagError::Overflow {
            id: self.id,
            counter,
        };
        let atomic = match counter {
            TagCounter::Total | TagCounter::Split => {
                let mut state = self.lock_split();
                if state.address.is_some() {
                    return Err(TagError::AlreadyDone(self.id));
                }
                let slot = if counter == TagCounter::Total {
                    &mut state.total
                } else {
                    &mut state.split
                };
                *slot = slot.checked_add(n).ok_or(overflow)?;
                return Ok(*slot);
            }
            TagCounter::Seen => &self.seen,
            TagCounter::Stored => &self.stored,
            TagCounter::Synced => &self.synced,
        };
        atomic
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_add(n))
            .map(|previous| previous + n)
            .map_err(|_| overflow)
    }

    pub fn get(&self, counter: TagCounter) -> u64 {
        match counter {
            TagCounter::Total => self.lock_split().total,
            TagCounter::Split => self.lock_split().split,
            TagCounter::Seen => self.seen.load(Ordering::Acquire),
            TagCounter::Stored => self.stored.load(Ordering::Acquire),
            TagCounter::Synced => self.synced.load(Ordering::Acquire),
        }
    }

    /// Mark splitting finished against the final reference.
    ///
    /// Replaces the declared total with the number of chunks actually split.
    /// Succeeds exactly once per tag.
    pub fn done_split(&self, address: Reference) -> Result<u64, TagError> {
        let mut state = self.lock_split();
        if state.address.is_some() {
            return Err(TagError::AlreadyDone(self.id));
        }
        state.total = state.split;
        state.address = Some(address);
        Ok(state.total)
    }

    pub fn address(&self) -> Option<Reference> {
        self.lock_split().address
    }

    pub fn is_done(&self) -> bool {
        self.address().is_some()
    }

    pub fn snapshot(&self) -> TagSnapshot {
        let (total, split, address) = {
            let state = self.lock_split();
            (state.total, state.split, state.address)
        };
        TagSnapshot {
            uid: self.id,
            total,
            split,
            seen: self.seen.load(Ordering::Acquire),
            stored: self.stored.load(Ordering::Acquire),
            synced: self.synced.load(Ordering::Acquire),
            address,
            started_at: self.started_at,
        }
    }

    fn lock_split(&self) -> MutexGuard<'_, SplitState> {
        self.split.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time view of a tag, as returned to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TagSnapshot {
    pub uid: TagId,
    pub total: u64,
    pub split: u64,
    pub seen: u64,
    pub stored: u64,
    pub synced: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Reference>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

/// All tags known to this node.
#[derive(Debug)]
pub struct TagRegistry {
    tags: DashMap<TagId, Arc<Tag>>,
    next_id: AtomicU32,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self {
            tags: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn create(&self) -> Arc<Tag> {
        let id = TagId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tag = Arc::new(Tag::new(id));
        self.tags.insert(id, tag.clone());
        tag
    }

    pub fn get(&self, id: TagId) -> Result<Arc<Tag>, TagError> {
        self.tags
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(TagError::NotFound(id))
    }

    /// Fetch the tag named by a client-supplied id, or create a new one.
    ///
    /// Returns the tag and whether it was created by this call.
    pub fn get_or_create(&self, id: Option<&str>) -> Result<(Arc<Tag>, bool), TagError> {
        match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Ok((self.get(raw.parse()?)?, false)),
            None => Ok((self.create(), true)),
        }
    }

    pub fn remove(&self, id: TagId) -> Result<(), TagError> {
        self.tags
            .remove(&id)
            .map(|_| ())
            .ok_or(TagError::NotFound(id))
    }

    pub fn list(&self) -> Vec<TagSnapshot> {
        let mut snapshots: Vec<_> = self.tags.iter().map(|entry| entry.snapshot()).collect();
        snapshots.sort_by_key(|s| s.uid);
        snapshots
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}
