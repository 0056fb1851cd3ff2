//! Error types for buffer encoding and decoding

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid buffer magic: {0:02x?}")]
    InvalidMagic([u8; 4]),

    #[error("Unknown compression method byte: {0:#04x}")]
    UnknownMethod(u8),

    #[error("Truncated buffer: expected {expected} bytes, got {actual}")]
    TruncatedData { expected: u64, actual: u64 },

    #[error("Block table covers {table} bytes but payload is {payload} bytes")]
    BlockTableMismatch { table: u64, payload: u64 },

    #[error("Block count {count} does not match raw size {raw_size} with block size {block_size}")]
    BlockCountMismatch {
        count: u32,
        raw_size: u64,
        block_size: u32,
    },

    #[error("Decompressed to {actual} bytes when {expected} bytes were expected")]
    RawSizeMismatch { expected: u64, actual: u64 },

    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Window [{offset}, {offset}+{size}) is outside raw size {raw_size}")]
    RangeOutOfBounds {
        offset: u64,
        size: u64,
        raw_size: u64,
    },

    #[error("Decompression error: {0}")]
    DecompressionFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;
