//! Block-compressed buffer format for content-addressed cache payloads
//!
//! A buffer is stored as a fixed header carrying the hash and size of the
//! uncompressed content, a block table, and a sequence of independently
//! compressed blocks. Independent blocks allow decompressing an arbitrary
//! byte window without inflating the whole payload.

pub mod compress;
pub mod decompress;
pub mod error;
pub mod hash;
pub mod header;
pub mod read;

mod buffer;

pub use buffer::CompressedBuffer;
pub use compress::CompressionMethod;
pub use error::{Error, Result};
pub use hash::RawHash;
pub use header::BufferHeader;
pub use read::BlockReader;

/// Magic bytes at the start of every encoded buffer
pub const BUFFER_MAGIC: [u8; 4] = *b"BCB1";

/// Raw bytes per block before compression
pub const DEFAULT_BLOCK_SIZE: u32 = 256 * 1024;
