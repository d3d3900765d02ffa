//! Content references.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a reference in bytes.
pub const REFERENCE_SIZE: usize = 32;

/// A 32-byte content address identifying a chunk, a manifest root or a feed root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference([u8; REFERENCE_SIZE]);

impl Reference {
    /// The all-zero reference, used as the target of metadata-only entries.
    pub const ZERO: Reference = Reference([0u8; REFERENCE_SIZE]);

    /// Create a reference from raw bytes.
    pub fn from_bytes(bytes: [u8; REFERENCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a reference from a slice that must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let arr: [u8; REFERENCE_SIZE] = bytes.try_into().map_err(|_| {
            crate::Error::InvalidReference(format!(
                "expected {REFERENCE_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; REFERENCE_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; REFERENCE_SIZE]
    }

    /// Compute the SHA-256 address of data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Self::hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ReferenceHasher {
        ReferenceHasher(Sha256::new())
    }

    /// Parse from a 64 character hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != REFERENCE_SIZE * 2 {
            return Err(crate::Error::InvalidReference(format!(
                "expected {} hex chars, got {}",
                REFERENCE_SIZE * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; REFERENCE_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| crate::Error::InvalidReference(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get the object store key for the chunk at this address.
    pub fn to_object_key(&self) -> String {
        let hex = self.to_hex();
        format!("chunks/{}/{}/{}", &hex[..2], &hex[2..4], hex)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Reference {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Incremental SHA-256 hasher producing a [`Reference`].
pub struct ReferenceHasher(Sha256);

impl ReferenceHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the reference.
    pub fn finalize(self) -> Reference {
        Reference(self.0.finalize().into())
    }
}
