//! The binary pak container format
//!
//! A pak file is payload bytes back-to-back, followed by the serialized
//! index, with a fixed-size header immediately before the index bytes and a
//! 12-byte footer at the very end of the file:
//!
//! ```text
//! [payload bytes ...]                         in put order
//! [Magic u32][IndexCrc u32][NumItems u32][SizeIndex u32]
//! [index entries ...]                         Key, Offset i64, Size i64, Crc u32
//! [Magic u32][IndexOffset i64]                footer, read via seek from end
//! ```
//!
//! All integers are little-endian. The magic appears twice, once in the
//! header and once in the footer, as a corruption sentinel.

use crate::error::{PakError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Corruption sentinel written before the index and in the footer
pub const PAK_MAGIC: u32 = 0x0c7c_0ddc;

/// Size of the footer at the end of the file
pub const FOOTER_LEN: u64 = 12;

/// Size of the index header preceding the index bytes
pub const INDEX_HEADER_LEN: u64 = 16;

/// Footer at the end of every pak file
#[derive(Debug, Clone, Copy)]
pub struct PakFooter {
    pub index_offset: i64,
}

impl PakFooter {
    pub fn serialize(&self) -> [u8; FOOTER_LEN as usize] {
        let mut out = [0u8; FOOTER_LEN as usize];
        out[..4].copy_from_slice(&PAK_MAGIC.to_le_bytes());
        out[4..].copy_from_slice(&self.index_offset.to_le_bytes());
        out
    }

    /// Parse the footer, validating the magic and the offset range
    ///
    /// `trailer_offset` is the file position of the footer itself; a valid
    /// index lies entirely before it.
    pub fn parse(bytes: &[u8], trailer_offset: u64) -> Result<Self> {
        if bytes.len() != FOOTER_LEN as usize {
            return Err(PakError::CorruptTrailer(format!(
                "footer is {} bytes, expected {FOOTER_LEN}",
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != PAK_MAGIC {
            return Err(PakError::CorruptTrailer(format!(
                "bad footer magic {magic:#010x}, expected {PAK_MAGIC:#010x}"
            )));
        }
        let index_offset = cursor.read_i64::<LittleEndian>()?;
        if index_offset < 0 || index_offset as u64 + INDEX_HEADER_LEN > trailer_offset {
            return Err(PakError::CorruptTrailer(format!(
                "index offset {index_offset} is outside the file"
            )));
        }
        Ok(Self { index_offset })
    }
}

/// Header written immediately before the index bytes
#[derive(Debug, Clone, Copy)]
pub struct IndexHeader {
    pub index_crc: u32,
    pub num_items: u32,
    pub size_index: u32,
}

impl IndexHeader {
    pub fn serialize(&self) -> [u8; INDEX_HEADER_LEN as usize] {
        let mut out = [0u8; INDEX_HEADER_LEN as usize];
        out[..4].copy_from_slice(&PAK_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.index_crc.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_items.to_le_bytes());
        out[12..].copy_from_slice(&self.size_index.to_le_bytes());
        out
    }

    /// Parse the index header, validating the magic and the internal
    /// consistency of the counts against the footer position
    pub fn parse(bytes: &[u8], index_offset: i64, trailer_offset: u64) -> Result<Self> {
        if bytes.len() != INDEX_HEADER_LEN as usize {
            return Err(PakError::CorruptIndex(format!(
                "index header is {} bytes, expected {INDEX_HEADER_LEN}",
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != PAK_MAGIC {
            return Err(PakError::CorruptIndex(format!(
                "bad index magic {magic:#010x}, expected {PAK_MAGIC:#010x}"
            )));
        }
        let index_crc = cursor.read_u32::<LittleEndian>()?;
        let num_items = cursor.read_u32::<LittleEndian>()?;
        let size_index = cursor.read_u32::<LittleEndian>()?;

        if (size_index == 0) != (num_items == 0) {
            return Err(PakError::CorruptIndex(format!(
                "inconsistent counts: {num_items} items in {size_index} index bytes"
            )));
        }
        if index_offset as u64 + INDEX_HEADER_LEN + u64::from(size_index) != trailer_offset {
            return Err(PakError::CorruptIndex(format!(
                "index at {index_offset} with {size_index} bytes does not reach the trailer at {trailer_offset}"
            )));
        }

        Ok(Self {
            index_crc,
            num_items,
            size_index,
        })
    }
}
