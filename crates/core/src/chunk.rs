//! Chunks: the smallest content-addressed storage unit.

use crate::reference::Reference;
use crate::{BRANCHES, CHUNK_SIZE, SPAN_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// A stored chunk: an address plus `span || payload`.
///
/// The span is the little-endian length of the data the chunk covers. For a
/// leaf it equals the payload length; for an intermediate chunk it is the sum
/// of its children's spans.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    address: Reference,
    data: Bytes,
}

impl Chunk {
    /// Build a content-addressed chunk. The address is SHA-256(span || payload).
    pub fn content(span: u64, payload: &[u8]) -> crate::Result<Self> {
        if payload.len() > CHUNK_SIZE {
            return Err(crate::Error::InvalidChunk(format!(
                "payload of {} bytes exceeds chunk size {CHUNK_SIZE}",
                payload.len()
            )));
        }
        let data = encode(span, payload);
        Ok(Self {
            address: Reference::compute(&data),
            data,
        })
    }

    /// Build a chunk whose address is not derived from its contents.
    pub fn single_owner(address: Reference, span: u64, payload: &[u8]) -> Self {
        Self {
            address,
            data: encode(span, payload),
        }
    }

    /// Reassemble a chunk loaded from storage.
    pub fn from_parts(address: Reference, data: Bytes) -> crate::Result<Self> {
        if data.len() < SPAN_SIZE || data.len() > SPAN_SIZE + CHUNK_SIZE {
            return Err(crate::Error::InvalidChunk(format!(
                "chunk {address} has invalid length {}",
                data.len()
            )));
        }
        Ok(Self { address, data })
    }

    pub fn address(&self) -> Reference {
        self.address
    }

    /// Raw `span || payload` bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn span(&self) -> u64 {
        let mut span = [0u8; SPAN_SIZE];
        span.copy_from_slice(&self.data[..SPAN_SIZE]);
        u64::from_le_bytes(span)
    }

    pub fn payload(&self) -> Bytes {
        self.data.slice(SPAN_SIZE..)
    }

    /// Check that the address matches the chunk contents.
    pub fn verify_content(&self) -> crate::Result<()> {
        let actual = Reference::compute(&self.data);
        if actual != self.address {
            return Err(crate::Error::HashMismatch {
                expected: self.address.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("address", &self.address)
            .field("span", &self.span())
            .field("len", &self.data.len())
            .finish()
    }
}

fn encode(span: u64, payload: &[u8]) -> Bytes {
    let mut data = BytesMut::with_capacity(SPAN_SIZE + payload.len());
    data.put_u64_le(span);
    data.put_slice(payload);
    data.freeze()
}

/// Estimate how many chunks storing `len` bytes will produce.
///
/// Used to pre-declare an upload's total on tags that were not created by the
/// upload itself, before the actual split count is known.
pub fn estimate_chunk_count(len: u64) -> u64 {
    let chunk = CHUNK_SIZE as u64;
    let branches = BRANCHES as u64;
    if len <= chunk {
        return 1;
    }

    let data_chunks = len.div_ceil(chunk);
    let mut total = data_chunks;
    let mut level = data_chunks;
    while level > branches {
        level = level.div_ceil(branches);
        total += level;
    }
    total + 1
}
