//! The content pipeline: byte streams to chunk trees and back.
//!
//! Data is cut into 4 KiB leaf chunks. Every 128 references on a level are
//! wrapped into an intermediate chunk one level up, whose span is the sum of
//! its children's spans. The root reference identifies the whole stream.

pub mod joiner;
pub mod splitter;

pub use joiner::Joiner;
pub use splitter::Splitter;

use crate::error::StorageResult;
use crate::traits::{ChunkStore, Putter};
use std::sync::Arc;
use tokio::io::AsyncRead;
use trove_core::{Reference, Tag};

/// Split `reader` into chunks written through `putter`.
pub async fn store<R>(putter: &dyn Putter, tag: Option<&Tag>, reader: R) -> StorageResult<Reference>
where
    R: AsyncRead + Unpin + Send,
{
    Splitter::new(putter).with_tag(tag).split(reader).await
}

/// Open the chunk tree rooted at `reference`. Returns the joiner and the data length.
pub async fn open(store: Arc<dyn ChunkStore>, reference: Reference) -> StorageResult<(Joiner, u64)> {
    let joiner = Joiner::new(store, reference).await?;
    let size = joiner.size();
    Ok((joiner, size))
}
