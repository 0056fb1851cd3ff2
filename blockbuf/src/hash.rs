//! Content hash of the uncompressed payload
//!
//! The raw hash identifies content independently of how it is compressed,
//! so identical payloads deduplicate to the same storage path no matter
//! which method or level produced the encoded bytes.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hash of the uncompressed content, SHA-256 truncated to 20 bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHash([u8; Self::LEN]);

impl RawHash {
    pub const LEN: usize = 20;

    /// Hash the given uncompressed content
    pub fn from_data(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut hash = [0u8; Self::LEN];
        hash.copy_from_slice(&digest[..Self::LEN]);
        Self(hash)
    }

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() == Self::LEN {
            let mut hash = [0u8; Self::LEN];
            hash.copy_from_slice(data);
            Some(Self(hash))
        } else {
            None
        }
    }

    /// Parse from a lowercase or uppercase hex string
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        Self::from_slice(&bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; Self::LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&byte| byte == 0)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for RawHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for RawHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHash({self})")
    }
}
