//! The owned compressed buffer type

use crate::compress::{compress_block, CompressionMethod};
use crate::decompress::decompress_block;
use crate::error::{Error, Result};
use crate::hash::RawHash;
use crate::header::BufferHeader;
use crate::DEFAULT_BLOCK_SIZE;
use bytes::Bytes;
use std::fmt;
use tracing::trace;

/// An encoded buffer: header, block table, and compressed blocks
///
/// The encoded form is self-describing and is what gets persisted; the raw
/// hash and raw size are readable without decompressing anything.
#[derive(Clone)]
pub struct CompressedBuffer {
    header: BufferHeader,
    encoded: Bytes,
}

impl CompressedBuffer {
    /// Compress raw content with the default block size
    pub fn compress(data: &[u8], method: CompressionMethod, level: u8) -> Result<Self> {
        Self::compress_with_block_size(data, method, level, DEFAULT_BLOCK_SIZE)
    }

    /// Compress raw content, splitting it into blocks of `block_size` bytes
    pub fn compress_with_block_size(
        data: &[u8],
        method: CompressionMethod,
        level: u8,
        block_size: u32,
    ) -> Result<Self> {
        if block_size == 0 && !data.is_empty() {
            return Err(Error::BlockCountMismatch {
                count: 0,
                raw_size: data.len() as u64,
                block_size,
            });
        }
        let raw_hash = RawHash::from_data(data);
        let blocks: Vec<&[u8]> = if data.is_empty() {
            Vec::new()
        } else {
            data.chunks(block_size as usize).collect()
        };

        let mut compressed_blocks = Vec::with_capacity(blocks.len());
        let mut block_sizes = Vec::with_capacity(blocks.len());
        for block in blocks {
            let compressed = compress_block(block, method, level)?;
            block_sizes.push(compressed.len() as u32);
            compressed_blocks.push(compressed);
        }

        let header = BufferHeader {
            method,
            level,
            raw_size: data.len() as u64,
            raw_hash,
            block_size,
            block_sizes,
        };

        let mut encoded = header.serialize();
        for block in &compressed_blocks {
            encoded.extend_from_slice(block);
        }

        trace!(
            raw_size = data.len(),
            compressed_size = encoded.len(),
            %method,
            "compressed buffer"
        );

        Ok(Self {
            header,
            encoded: Bytes::from(encoded),
        })
    }

    /// Parse an encoded buffer, validating the header against the payload
    pub fn from_encoded(encoded: Bytes) -> Result<Self> {
        let header = BufferHeader::parse(&encoded)?;
        Ok(Self { header, encoded })
    }

    pub fn method(&self) -> CompressionMethod {
        self.header.method
    }

    pub fn level(&self) -> u8 {
        self.header.level
    }

    pub fn raw_hash(&self) -> RawHash {
        self.header.raw_hash
    }

    pub fn raw_size(&self) -> u64 {
        self.header.raw_size
    }

    pub fn compressed_size(&self) -> u64 {
        self.encoded.len() as u64
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.encoded
    }

    pub fn into_bytes(self) -> Bytes {
        self.encoded
    }

    pub(crate) fn header(&self) -> &BufferHeader {
        &self.header
    }

    /// Decompress one block into raw bytes
    pub(crate) fn decompress_one(&self, block: usize) -> Result<Vec<u8>> {
        let start = self.header.block_offset(block) as usize;
        let end = start + self.header.block_sizes[block] as usize;
        decompress_block(
            &self.encoded[start..end],
            self.header.method,
            self.header.block_raw_len(block) as usize,
        )
    }

    /// Decompress the whole payload, verifying the raw hash
    pub fn decompress(&self) -> Result<Bytes> {
        let mut raw = Vec::with_capacity(self.header.raw_size as usize);
        for block in 0..self.header.block_sizes.len() {
            raw.extend_from_slice(&self.decompress_one(block)?);
        }

        if raw.len() as u64 != self.header.raw_size {
            return Err(Error::RawSizeMismatch {
                expected: self.header.raw_size,
                actual: raw.len() as u64,
            });
        }
        let actual_hash = RawHash::from_data(&raw);
        if actual_hash != self.header.raw_hash {
            return Err(Error::HashMismatch {
                expected: self.header.raw_hash.to_string(),
                actual: actual_hash.to_string(),
            });
        }

        Ok(Bytes::from(raw))
    }

    /// Decompress the byte window `[offset, offset + size)` of the raw
    /// content, touching only the blocks the window overlaps
    ///
    /// Window integrity rests on the per-block length checks; the raw hash
    /// covers the whole payload and is only verified by [`Self::decompress`].
    pub fn decompress_range(&self, offset: u64, size: u64) -> Result<Bytes> {
        if offset.checked_add(size).is_none_or(|end| end > self.header.raw_size) {
            return Err(Error::RangeOutOfBounds {
                offset,
                size,
                raw_size: self.header.raw_size,
            });
        }
        if size == 0 {
            return Ok(Bytes::new());
        }

        let block_size = u64::from(self.header.block_size);
        let first = (offset / block_size) as usize;
        let last = ((offset + size - 1) / block_size) as usize;

        let mut window = Vec::with_capacity(size as usize);
        for block in first..=last {
            let raw = self.decompress_one(block)?;
            let block_start = block as u64 * block_size;
            let from = offset.saturating_sub(block_start) as usize;
            let to = ((offset + size - block_start).min(raw.len() as u64)) as usize;
            window.extend_from_slice(&raw[from..to]);
        }

        Ok(Bytes::from(window))
    }
}

impl fmt::Debug for CompressedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedBuffer")
            .field("method", &self.header.method)
            .field("raw_size", &self.header.raw_size)
            .field("raw_hash", &self.header.raw_hash)
            .field("compressed_size", &self.encoded.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn round_trip_multi_block() {
        let data = pattern(10_000);
        let buffer =
            CompressedBuffer::compress_with_block_size(&data, CompressionMethod::Zlib, 6, 1024)
                .unwrap();
        assert_eq!(buffer.raw_size(), 10_000);
        assert_eq!(buffer.raw_hash(), RawHash::from_data(&data));
        assert_eq!(buffer.decompress().unwrap(), Bytes::from(data));
    }

    #[test]
    fn round_trip_empty() {
        let buffer = CompressedBuffer::compress(&[], CompressionMethod::Lz4, 0).unwrap();
        assert_eq!(buffer.raw_size(), 0);
        assert_eq!(buffer.decompress().unwrap(), Bytes::new());
    }

    #[test]
    fn encoded_round_trip() {
        let data = pattern(5000);
        let buffer =
            CompressedBuffer::compress_with_block_size(&data, CompressionMethod::Lz4, 0, 512)
                .unwrap();
        let reparsed = CompressedBuffer::from_encoded(buffer.as_bytes().clone()).unwrap();
        assert_eq!(reparsed.raw_hash(), buffer.raw_hash());
        assert_eq!(reparsed.decompress().unwrap(), Bytes::from(data));
    }

    #[test]
    fn range_within_one_block() {
        let data = pattern(4096);
        let buffer =
            CompressedBuffer::compress_with_block_size(&data, CompressionMethod::Zlib, 6, 1024)
                .unwrap();
        let window = buffer.decompress_range(100, 200).unwrap();
        assert_eq!(&window[..], &data[100..300]);
    }

    #[test]
    fn range_across_blocks() {
        let data = pattern(4096);
        let buffer =
            CompressedBuffer::compress_with_block_size(&data, CompressionMethod::Lz4, 0, 1024)
                .unwrap();
        let window = buffer.decompress_range(1000, 1100).unwrap();
        assert_eq!(&window[..], &data[1000..2100]);
    }

    #[test]
    fn range_out_of_bounds() {
        let buffer = CompressedBuffer::compress(&pattern(100), CompressionMethod::None, 0).unwrap();
        assert!(buffer.decompress_range(90, 20).is_err());
        assert!(buffer.decompress_range(u64::MAX, 1).is_err());
    }

    #[test]
    fn corrupt_payload_fails_hash_check() {
        let data = pattern(2000);
        let buffer =
            CompressedBuffer::compress_with_block_size(&data, CompressionMethod::None, 0, 512)
                .unwrap();
        let mut encoded = buffer.as_bytes().to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        let corrupt = CompressedBuffer::from_encoded(Bytes::from(encoded)).unwrap();
        assert!(corrupt.decompress().is_err());
    }
}
