//! Encoded buffer header parsing and serialization

use crate::compress::CompressionMethod;
use crate::error::{Error, Result};
use crate::hash::RawHash;
use crate::BUFFER_MAGIC;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Parsed header of an encoded buffer
///
/// Layout, little-endian:
///
/// ```text
/// magic      [u8; 4]
/// method     u8
/// level      u8
/// reserved   u16
/// raw_size   u64
/// raw_hash   [u8; 20]
/// block_size u32      raw bytes per block
/// num_blocks u32
/// table      u32 * num_blocks   compressed size of each block
/// ```
#[derive(Debug, Clone)]
pub struct BufferHeader {
    pub method: CompressionMethod,
    pub level: u8,
    pub raw_size: u64,
    pub raw_hash: RawHash,
    pub block_size: u32,
    /// Compressed size of each block, in payload order
    pub block_sizes: Vec<u32>,
}

/// Header length before the block table
pub const HEADER_BASE_LEN: usize = 44;

impl BufferHeader {
    /// Total encoded header length including the block table
    pub fn encoded_len(&self) -> usize {
        HEADER_BASE_LEN + self.block_sizes.len() * 4
    }

    /// Total compressed payload length described by the block table
    pub fn payload_len(&self) -> u64 {
        self.block_sizes.iter().map(|&size| u64::from(size)).sum()
    }

    /// Byte offset of the given block within the encoded buffer
    pub fn block_offset(&self, block: usize) -> u64 {
        self.encoded_len() as u64
            + self.block_sizes[..block]
                .iter()
                .map(|&size| u64::from(size))
                .sum::<u64>()
    }

    /// Raw length of the given block, accounting for a short final block
    pub fn block_raw_len(&self, block: usize) -> u64 {
        let start = u64::from(self.block_size) * block as u64;
        (self.raw_size - start).min(u64::from(self.block_size))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&BUFFER_MAGIC);
        out.push(self.method.as_byte());
        out.push(self.level);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.raw_size.to_le_bytes());
        out.extend_from_slice(self.raw_hash.as_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&(self.block_sizes.len() as u32).to_le_bytes());
        for &size in &self.block_sizes {
            out.extend_from_slice(&size.to_le_bytes());
        }
        out
    }

    /// Parse and validate a header from the front of an encoded buffer
    ///
    /// Checks the magic, the method byte, the block count against the raw
    /// size, and that the block table covers exactly the bytes that follow
    /// the header.
    pub fn parse(encoded: &[u8]) -> Result<Self> {
        if encoded.len() < HEADER_BASE_LEN {
            return Err(Error::TruncatedData {
                expected: HEADER_BASE_LEN as u64,
                actual: encoded.len() as u64,
            });
        }

        let mut cursor = Cursor::new(encoded);
        let mut magic = [0u8; 4];
        std::io::Read::read_exact(&mut cursor, &mut magic)?;
        if magic != BUFFER_MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let method_byte = cursor.read_u8()?;
        let method =
            CompressionMethod::from_byte(method_byte).ok_or(Error::UnknownMethod(method_byte))?;
        let level = cursor.read_u8()?;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let raw_size = cursor.read_u64::<LittleEndian>()?;

        let mut hash_bytes = [0u8; RawHash::LEN];
        std::io::Read::read_exact(&mut cursor, &mut hash_bytes)?;
        let raw_hash = RawHash::from_bytes(hash_bytes);

        let block_size = cursor.read_u32::<LittleEndian>()?;
        let num_blocks = cursor.read_u32::<LittleEndian>()?;

        let expected_blocks = if raw_size == 0 {
            0
        } else if block_size == 0 {
            return Err(Error::BlockCountMismatch {
                count: num_blocks,
                raw_size,
                block_size,
            });
        } else {
            raw_size.div_ceil(u64::from(block_size))
        };
        if u64::from(num_blocks) != expected_blocks {
            return Err(Error::BlockCountMismatch {
                count: num_blocks,
                raw_size,
                block_size,
            });
        }

        let table_len = num_blocks as usize * 4;
        if encoded.len() < HEADER_BASE_LEN + table_len {
            return Err(Error::TruncatedData {
                expected: (HEADER_BASE_LEN + table_len) as u64,
                actual: encoded.len() as u64,
            });
        }
        let mut block_sizes = Vec::with_capacity(num_blocks as usize);
        for _ in 0..num_blocks {
            block_sizes.push(cursor.read_u32::<LittleEndian>()?);
        }

        let header = Self {
            method,
            level,
            raw_size,
            raw_hash,
            block_size,
            block_sizes,
        };

        let payload = encoded.len() as u64 - header.encoded_len() as u64;
        if header.payload_len() != payload {
            return Err(Error::BlockTableMismatch {
                table: header.payload_len(),
                payload,
            });
        }

        Ok(header)
    }
}
