//! Feeds: mutable pointers resolved by time to a versioned target reference.

use crate::chunk::Chunk;
use crate::manifest::{FEED_OWNER_KEY, FEED_TOPIC_KEY, FEED_TYPE_KEY, Metadata};
use crate::reference::{REFERENCE_SIZE, Reference};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const OWNER_SIZE: usize = 20;
pub const TOPIC_SIZE: usize = 32;

/// Payload length of a feed update: timestamp followed by the target reference.
pub const FEED_UPDATE_SIZE: usize = 8 + REFERENCE_SIZE;

/// How a feed's updates are indexed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    #[default]
    Sequence,
    Epoch,
}

impl FeedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Sequence => "sequence",
            FeedType::Epoch => "epoch",
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequence" => Ok(FeedType::Sequence),
            "epoch" => Ok(FeedType::Epoch),
            other => Err(crate::Error::InvalidFeed(format!("unknown feed type: {other}"))),
        }
    }
}

/// A feed identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Feed {
    pub owner: [u8; OWNER_SIZE],
    pub topic: [u8; TOPIC_SIZE],
    pub kind: FeedType,
}

impl Feed {
    pub fn new(owner: [u8; OWNER_SIZE], topic: [u8; TOPIC_SIZE], kind: FeedType) -> Self {
        Self { owner, topic, kind }
    }

    /// Decode owner and topic from hex.
    pub fn from_hex(owner: &str, topic: &str, kind: FeedType) -> crate::Result<Self> {
        let mut owner_bytes = [0u8; OWNER_SIZE];
        hex::decode_to_slice(owner, &mut owner_bytes)
            .map_err(|e| crate::Error::InvalidFeed(format!("owner: {e}")))?;
        let mut topic_bytes = [0u8; TOPIC_SIZE];
        hex::decode_to_slice(topic, &mut topic_bytes)
            .map_err(|e| crate::Error::InvalidFeed(format!("topic: {e}")))?;
        Ok(Self::new(owner_bytes, topic_bytes, kind))
    }

    /// Read a feed identity from a root entry's metadata.
    ///
    /// Returns `Ok(None)` when owner or topic is absent. A missing type means
    /// a sequence feed.
    pub fn from_metadata(metadata: &Metadata) -> crate::Result<Option<Self>> {
        let (Some(owner), Some(topic)) = (metadata.get(FEED_OWNER_KEY), metadata.get(FEED_TOPIC_KEY))
        else {
            return Ok(None);
        };
        let kind = match metadata.get(FEED_TYPE_KEY) {
            Some(kind) => kind.parse()?,
            None => FeedType::default(),
        };
        Self::from_hex(owner, topic, kind).map(Some)
    }

    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(FEED_OWNER_KEY.to_string(), self.owner_hex());
        metadata.insert(FEED_TOPIC_KEY.to_string(), self.topic_hex());
        metadata.insert(FEED_TYPE_KEY.to_string(), self.kind.to_string());
        metadata
    }

    pub fn owner_hex(&self) -> String {
        hex::encode(self.owner)
    }

    pub fn topic_hex(&self) -> String {
        hex::encode(self.topic)
    }

    /// Address of the update chunk at `index`: SHA-256(owner || topic || index).
    pub fn update_address(&self, index: FeedIndex) -> Reference {
        let mut hasher = Reference::hasher();
        hasher.update(&self.owner);
        hasher.update(&self.topic);
        hasher.update(&index.to_bytes());
        hasher.finalize()
    }
}

impl fmt::Debug for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Feed({}/{}, {})",
            self.owner_hex(),
            &self.topic_hex()[..16],
            self.kind
        )
    }
}

/// Position of an update within a sequence feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedIndex(pub u64);

impl FeedIndex {
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Hex of the big-endian index, as exposed in response headers.
    pub fn to_hex(self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for FeedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded payload of a feed update chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedUpdate {
    /// Unix seconds at which the update was published.
    pub timestamp: i64,
    pub target: Reference,
}

impl FeedUpdate {
    pub fn new(timestamp: i64, target: Reference) -> Self {
        Self { timestamp, target }
    }

    pub fn encode(&self) -> [u8; FEED_UPDATE_SIZE] {
        let mut payload = [0u8; FEED_UPDATE_SIZE];
        payload[..8].copy_from_slice(&self.timestamp.to_be_bytes());
        payload[8..].copy_from_slice(self.target.as_bytes());
        payload
    }

    pub fn decode(payload: &[u8]) -> crate::Result<Self> {
        if payload.len() != FEED_UPDATE_SIZE {
            return Err(crate::Error::MalformedFeedUpdate(format!(
                "expected {FEED_UPDATE_SIZE} bytes, got {}",
                payload.len()
            )));
        }
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&payload[..8]);
        let target = Reference::from_slice(&payload[8..])
            .map_err(|e| crate::Error::MalformedFeedUpdate(e.to_string()))?;
        Ok(Self::new(i64::from_be_bytes(timestamp), target))
    }

    /// Wrap the update in the chunk stored at the feed's `index`.
    pub fn to_chunk(&self, feed: &Feed, index: FeedIndex) -> Chunk {
        Chunk::single_owner(
            feed.update_address(index),
            FEED_UPDATE_SIZE as u64,
            &self.encode(),
        )
    }

    pub fn from_chunk(chunk: &Chunk) -> crate::Result<Self> {
        if chunk.span() != FEED_UPDATE_SIZE as u64 {
            return Err(crate::Error::MalformedFeedUpdate(format!(
                "unexpected span {}",
                chunk.span()
            )));
        }
        Self::decode(&chunk.payload())
    }
}
