//! Block compression
//!
//! Each block of raw content is compressed independently so that a byte
//! window can later be decompressed without touching the rest of the
//! payload. Supported methods:
//! - `N` (None): no compression
//! - `Z` (Zlib): zlib with configurable levels
//! - `4` (Lz4): LZ4 block compression

use crate::error::{Error, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Compression method applied to every block of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Zlib,
    Lz4,
}

impl CompressionMethod {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::None => b'N',
            Self::Zlib => b'Z',
            Self::Lz4 => b'4',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'N' => Some(Self::None),
            b'Z' => Some(Self::Zlib),
            b'4' => Some(Self::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Zlib => write!(f, "zlib"),
            Self::Lz4 => write!(f, "lz4"),
        }
    }
}

/// Compress a single block with the given method
pub fn compress_block(data: &[u8], method: CompressionMethod, level: u8) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Zlib => compress_zlib(data, level),
        CompressionMethod::Lz4 => Ok(lz4_flex::compress(data)),
    }
}

fn compress_zlib(data: &[u8], level: u8) -> Result<Vec<u8>> {
    let compression_level = match level {
        0 => Compression::none(),
        1 => Compression::fast(),
        2..=8 => Compression::new(u32::from(level)),
        9 => Compression::best(),
        _ => Compression::default(),
    };

    let mut encoder = ZlibEncoder::new(Vec::new(), compression_level);
    encoder.write_all(data).map_err(Error::Io)?;
    encoder.finish().map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_byte_round_trip() {
        for method in [
            CompressionMethod::None,
            CompressionMethod::Zlib,
            CompressionMethod::Lz4,
        ] {
            assert_eq!(CompressionMethod::from_byte(method.as_byte()), Some(method));
        }
        assert_eq!(CompressionMethod::from_byte(b'E'), None);
    }

    #[test]
    fn zlib_shrinks_repetitive_data() {
        let data = vec![7u8; 4096];
        let compressed = compress_block(&data, CompressionMethod::Zlib, 6).unwrap();
        assert!(compressed.len() < data.len());
    }
}
