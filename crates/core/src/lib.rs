//! Core domain types for the trove content gateway.
//!
//! This crate defines the data model shared by storage and server:
//! - Content references and chunks
//! - Manifest entries and website configuration
//! - Feed identities, indexes and updates
//! - Upload progress tags
//! - Postage batch identifiers
//! - Application configuration

pub mod chunk;
pub mod config;
pub mod error;
pub mod feed;
pub mod manifest;
pub mod postage;
pub mod reference;
pub mod tag;

pub use chunk::{Chunk, estimate_chunk_count};
pub use error::{Error, Result};
pub use feed::{Feed, FeedIndex, FeedType, FeedUpdate};
pub use manifest::{ManifestEntry, Metadata, WebsiteConfig};
pub use postage::BatchId;
pub use reference::Reference;
pub use tag::{Tag, TagCounter, TagError, TagId, TagRegistry, TagSnapshot};

/// Maximum payload carried by a single chunk: 4 KiB
pub const CHUNK_SIZE: usize = 4096;

/// Size of the little-endian span prefix of every chunk.
pub const SPAN_SIZE: usize = 8;

/// Number of child references an intermediate chunk can hold.
pub const BRANCHES: usize = CHUNK_SIZE / reference::REFERENCE_SIZE;
