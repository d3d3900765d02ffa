//! Random-access reader over a chunk tree.

use crate::error::{StorageError, StorageResult};
use crate::traits::ChunkStore;
use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use trove_core::reference::REFERENCE_SIZE;
use trove_core::{BRANCHES, CHUNK_SIZE, Chunk, Reference};

/// Reads byte ranges of the data rooted at a reference.
#[derive(Clone)]
pub struct Joiner {
    store: Arc<dyn ChunkStore>,
    root: Chunk,
}

impl Joiner {
    /// Load the root chunk. A missing root is `StorageError::NotFound`.
    pub async fn new(store: Arc<dyn ChunkStore>, reference: Reference) -> StorageResult<Self> {
        let root = fetch(store.as_ref(), &reference).await?;
        Ok(Self { store, root })
    }

    pub fn reference(&self) -> Reference {
        self.root.address()
    }

    /// Total data length.
    pub fn size(&self) -> u64 {
        self.root.span()
    }

    /// Read `len` bytes starting at `offset`, clamped to the data length.
    pub async fn read_at(&self, offset: u64, len: usize) -> StorageResult<Bytes> {
        let size = self.size();
        if offset > size {
            return Err(StorageError::InvalidRange(format!(
                "offset {offset} beyond size {size}"
            )));
        }
        let end = offset.saturating_add(len as u64).min(size);
        if end == offset {
            return Ok(Bytes::new());
        }
        let mut out = BytesMut::with_capacity((end - offset) as usize);
        self.read_node(self.root.clone(), offset, end, &mut out)
            .await?;
        Ok(out.freeze())
    }

    /// Read the whole data into memory.
    pub async fn read_all(&self) -> StorageResult<Bytes> {
        let size = usize::try_from(self.size())
            .map_err(|_| StorageError::InvalidRange(format!("size {} too large", self.size())))?;
        self.read_at(0, size).await
    }

    /// Append bytes `[start, end)` of the subtree rooted at `chunk`.
    fn read_node<'a>(
        &'a self,
        chunk: Chunk,
        start: u64,
        end: u64,
        out: &'a mut BytesMut,
    ) -> BoxFuture<'a, StorageResult<()>> {
        async move {
            let span = chunk.span();
            let payload = chunk.payload();

            if span <= CHUNK_SIZE as u64 {
                if payload.len() as u64 != span {
                    return Err(StorageError::InvalidChunk(format!(
                        "leaf {} has span {span} but {} payload bytes",
                        chunk.address(),
                        payload.len()
                    )));
                }
                out.extend_from_slice(&payload[start as usize..end as usize]);
                return Ok(());
            }

            let cap = subtree_capacity(span);
            let children = span.div_ceil(cap) as usize;
            if payload.len() != children * REFERENCE_SIZE {
                return Err(StorageError::InvalidChunk(format!(
                    "intermediate {} has span {span} but {} references",
                    chunk.address(),
                    payload.len() / REFERENCE_SIZE
                )));
            }

            let first = (start / cap) as usize;
            let last = ((end - 1) / cap) as usize;
            for index in first..=last {
                let at = index * REFERENCE_SIZE;
                let child_ref = Reference::from_slice(&payload[at..at + REFERENCE_SIZE])?;
                let child_start = index as u64 * cap;
                let child = fetch(self.store.as_ref(), &child_ref).await?;
                let from = start.max(child_start) - child_start;
                let to = end.min(child_start + cap) - child_start;
                self.read_node(child, from, to, out).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

/// Bytes covered by each child of an intermediate chunk spanning `span`.
fn subtree_capacity(span: u64) -> u64 {
    let branches = BRANCHES as u64;
    let mut cap = CHUNK_SIZE as u64;
    while cap.saturating_mul(branches) < span {
        cap = cap.saturating_mul(branches);
    }
    cap
}

async fn fetch(store: &dyn ChunkStore, reference: &Reference) -> StorageResult<Chunk> {
    let chunk = store.get(reference).await?;
    chunk
        .verify_content()
        .map_err(|e| StorageError::InvalidChunk(e.to_string()))?;
    Ok(chunk)
}
