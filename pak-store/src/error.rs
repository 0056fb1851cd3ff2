//! Error types for pak store operations

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PakError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Store is closed")]
    StoreClosed,

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Corrupt pak trailer: {0}")]
    CorruptTrailer(String),

    #[error("Corrupt pak index: {0}")]
    CorruptIndex(String),

    #[error("Failed to save pak index: {0}")]
    SaveFailed(String),

    #[error("Record error: {0}")]
    Record(#[from] cache_record::RecordError),
}

pub type Result<T> = std::result::Result<T, PakError>;
