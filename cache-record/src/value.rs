//! Values: content-addressed payloads, with or without their data

use blockbuf::{CompressedBuffer, RawHash};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier for a value within a record, 12 bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId([u8; Self::LEN]);

impl ValueId {
    pub const LEN: usize = 12;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() == Self::LEN {
            let mut id = [0u8; Self::LEN];
            id.copy_from_slice(data);
            Some(Self(id))
        } else {
            None
        }
    }

    /// Derive a stable id from a human-readable name
    pub fn from_name(name: &str) -> Self {
        let digest = Sha256::digest(name.as_bytes());
        let mut id = [0u8; Self::LEN];
        id.copy_from_slice(&digest[..Self::LEN]);
        Self(id)
    }

    pub const fn null() -> Self {
        Self([0u8; Self::LEN])
    }

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&byte| byte == 0)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({self})")
    }
}

/// A content-addressed payload
///
/// Either carries its compressed data, or is a reference: the raw hash and
/// size are known and the content lives elsewhere (an external
/// content-addressed entry, or another cache tier).
#[derive(Debug, Clone)]
pub struct Value {
    raw_hash: RawHash,
    raw_size: u64,
    data: Option<CompressedBuffer>,
}

impl Value {
    /// A value carrying its compressed data
    pub fn from_buffer(data: CompressedBuffer) -> Self {
        Self {
            raw_hash: data.raw_hash(),
            raw_size: data.raw_size(),
            data: Some(data),
        }
    }

    /// A reference to content stored elsewhere
    pub fn reference(raw_hash: RawHash, raw_size: u64) -> Self {
        Self {
            raw_hash,
            raw_size,
            data: None,
        }
    }

    pub fn raw_hash(&self) -> RawHash {
        self.raw_hash
    }

    pub fn raw_size(&self) -> u64 {
        self.raw_size
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&CompressedBuffer> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<CompressedBuffer> {
        self.data
    }

    /// The same value as a reference, dropping any attached data
    pub fn remove_data(&self) -> Self {
        Self::reference(self.raw_hash, self.raw_size)
    }
}

/// A value paired with its id within a record
#[derive(Debug, Clone)]
pub struct ValueWithId {
    id: ValueId,
    value: Value,
}

impl ValueWithId {
    pub fn new(id: ValueId, value: Value) -> Self {
        Self { id, value }
    }

    pub fn id(&self) -> ValueId {
        self.id
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockbuf::compress::CompressionMethod;

    #[test]
    fn value_id_from_name_is_stable() {
        assert_eq!(ValueId::from_name("Positions"), ValueId::from_name("Positions"));
        assert_ne!(ValueId::from_name("Positions"), ValueId::from_name("Normals"));
        assert!(!ValueId::from_name("Positions").is_null());
    }

    #[test]
    fn value_from_buffer_exposes_hash_and_size() {
        let data = b"cooked mesh data".as_slice();
        let buffer = CompressedBuffer::compress(data, CompressionMethod::Zlib, 6).unwrap();
        let value = Value::from_buffer(buffer);
        assert!(value.has_data());
        assert_eq!(value.raw_size(), data.len() as u64);
        assert_eq!(value.raw_hash(), RawHash::from_data(data));

        let reference = value.remove_data();
        assert!(!reference.has_data());
        assert_eq!(reference.raw_hash(), value.raw_hash());
    }
}
