//! Error types for the record model and package formats

use crate::value::ValueId;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid package magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    #[error("Unknown package kind: {0:#04x}")]
    UnknownKind(u8),

    #[error("Truncated package: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Package checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("Invalid cache bucket name: {0:?}")]
    InvalidBucket(String),

    #[error("Duplicate value id {0} in record")]
    DuplicateValueId(ValueId),

    #[error("Package values are not sorted by id")]
    UnsortedValues,

    #[error("Duplicate attachment with hash {0}")]
    DuplicateAttachment(String),

    #[error("Metadata error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Buffer error: {0}")]
    Buffer(#[from] blockbuf::Error),
}

pub type Result<T> = std::result::Result<T, RecordError>;
