//! Streaming splitter building a chunk tree bottom-up.

use crate::error::StorageResult;
use crate::traits::Putter;
use tokio::io::{AsyncRead, AsyncReadExt};
use trove_core::{BRANCHES, CHUNK_SIZE, Chunk, Reference, Tag, TagCounter};

/// A reference together with the number of data bytes beneath it.
type Node = (Reference, u64);

/// Splits a byte stream into content-addressed chunks.
pub struct Splitter<'a> {
    putter: &'a dyn Putter,
    tag: Option<&'a Tag>,
    levels: Vec<Vec<Node>>,
}

impl<'a> Splitter<'a> {
    pub fn new(putter: &'a dyn Putter) -> Self {
        Self {
            putter,
            tag: None,
            levels: Vec::new(),
        }
    }

    /// Account split/stored/seen chunks on `tag`.
    pub fn with_tag(mut self, tag: Option<&'a Tag>) -> Self {
        self.tag = tag;
        self
    }

    /// Consume the reader and return the root reference.
    pub async fn split<R>(mut self, mut reader: R) -> StorageResult<Reference>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let filled = fill(&mut reader, &mut buf).await?;
            if filled == 0 {
                break;
            }
            let reference = self.write_chunk(filled as u64, &buf[..filled]).await?;
            self.append(0, (reference, filled as u64)).await?;
            if filled < CHUNK_SIZE {
                break;
            }
        }
        self.finish().await
    }

    pub async fn split_bytes(self, data: &[u8]) -> StorageResult<Reference> {
        self.split(data).await
    }

    async fn write_chunk(&mut self, span: u64, payload: &[u8]) -> StorageResult<Reference> {
        let chunk = Chunk::content(span, payload)?;
        let reference = chunk.address();
        if let Some(tag) = self.tag {
            tag.inc(TagCounter::Split)?;
        }
        let created = self.putter.put(chunk).await?;
        if let Some(tag) = self.tag {
            tag.inc(if created {
                TagCounter::Stored
            } else {
                TagCounter::Seen
            })?;
        }
        Ok(reference)
    }

    /// Push a node onto `level`, wrapping full levels upwards.
    async fn append(&mut self, mut level: usize, mut node: Node) -> StorageResult<()> {
        loop {
            if self.levels.len() <= level {
                self.levels.push(Vec::new());
            }
            self.levels[level].push(node);
            if self.levels[level].len() < BRANCHES {
                return Ok(());
            }
            let children = std::mem::take(&mut self.levels[level]);
            node = self.wrap(&children).await?;
            level += 1;
        }
    }

    async fn wrap(&mut self, children: &[Node]) -> StorageResult<Node> {
        let span = children.iter().map(|(_, span)| span).sum();
        let payload: Vec<u8> = children
            .iter()
            .flat_map(|(reference, _)| reference.as_bytes().iter().copied())
            .collect();
        let reference = self.write_chunk(span, &payload).await?;
        Ok((reference, span))
    }

    /// Collapse partial levels into a single root.
    async fn finish(mut self) -> StorageResult<Reference> {
        if self.levels.is_empty() {
            return self.write_chunk(0, &[]).await;
        }

        let mut level = 0;
        loop {
            let higher_empty = self.levels[level + 1..].iter().all(Vec::is_empty);
            let current = std::mem::take(&mut self.levels[level]);
            let carried = match current.as_slice() {
                [] => None,
                [single] if higher_empty => return Ok(single.0),
                [single] => Some(*single),
                children => Some(self.wrap(children).await?),
            };
            if let Some(node) = carried {
                if self.levels.len() <= level + 1 {
                    self.levels.push(Vec::new());
                }
                self.levels[level + 1].push(node);
            } else if higher_empty {
                return Err(crate::StorageError::InvalidChunk(
                    "split produced no chunks".to_string(),
                ));
            }
            level += 1;
        }
    }
}

/// Read until `buf` is full or the reader is exhausted.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
