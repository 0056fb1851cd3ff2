//! Cache keys
//!
//! A key names one cache entry: a bucket (the producer's namespace, e.g.
//! `ShaderDDC` or `Texture`) and the content hash of the inputs that
//! produced the entry. The `Display` form is stable and doubles as the
//! relative path component the store files the entry under.

use crate::error::{RecordError, Result};
use blockbuf::RawHash;
use std::fmt;

/// Longest accepted bucket name
const MAX_BUCKET_LEN: usize = 64;

/// Identifier for a cache entry: a bucket name and an input hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    bucket: String,
    hash: RawHash,
}

impl CacheKey {
    /// Create a key, validating the bucket name
    ///
    /// Bucket names are 1-64 ASCII alphanumeric characters so that every
    /// key converts to a portable relative path.
    pub fn new(bucket: impl Into<String>, hash: RawHash) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.is_empty()
            || bucket.len() > MAX_BUCKET_LEN
            || !bucket.bytes().all(|byte| byte.is_ascii_alphanumeric())
        {
            return Err(RecordError::InvalidBucket(bucket));
        }
        Ok(Self { bucket, hash })
    }

    /// Create a key by hashing the given input bytes
    pub fn from_data(bucket: impl Into<String>, data: &[u8]) -> Result<Self> {
        Self::new(bucket, RawHash::from_data(data))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn hash(&self) -> RawHash {
        self.hash
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.hash)
    }
}
