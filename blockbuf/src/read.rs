//! Windowed reader over a compressed buffer
//!
//! Caches the most recently decompressed block so that a run of chunk
//! requests against the same value decompresses each block once.

use crate::buffer::CompressedBuffer;
use crate::error::{Error, Result};
use crate::hash::RawHash;
use bytes::Bytes;

/// Reader that serves raw byte windows out of a compressed buffer
pub struct BlockReader {
    buffer: CompressedBuffer,
    cached: Option<(usize, Bytes)>,
}

impl BlockReader {
    pub fn new(buffer: CompressedBuffer) -> Self {
        Self {
            buffer,
            cached: None,
        }
    }

    pub fn raw_hash(&self) -> RawHash {
        self.buffer.raw_hash()
    }

    pub fn raw_size(&self) -> u64 {
        self.buffer.raw_size()
    }

    fn block(&mut self, index: usize) -> Result<Bytes> {
        if let Some((cached_index, ref raw)) = self.cached {
            if cached_index == index {
                return Ok(raw.clone());
            }
        }
        let raw = Bytes::from(self.buffer.decompress_one(index)?);
        self.cached = Some((index, raw.clone()));
        Ok(raw)
    }

    /// Read the raw byte window `[offset, offset + size)`
    pub fn read(&mut self, offset: u64, size: u64) -> Result<Bytes> {
        let raw_size = self.buffer.raw_size();
        if offset.checked_add(size).is_none_or(|end| end > raw_size) {
            return Err(Error::RangeOutOfBounds {
                offset,
                size,
                raw_size,
            });
        }
        if size == 0 {
            return Ok(Bytes::new());
        }

        let block_size = u64::from(self.buffer.header().block_size);
        let first = (offset / block_size) as usize;
        let last = ((offset + size - 1) / block_size) as usize;

        // A single-block window borrows the cached block without copying.
        if first == last {
            let raw = self.block(first)?;
            let from = (offset - first as u64 * block_size) as usize;
            return Ok(raw.slice(from..from + size as usize));
        }

        let mut window = Vec::with_capacity(size as usize);
        for index in first..=last {
            let raw = self.block(index)?;
            let block_start = index as u64 * block_size;
            let from = offset.saturating_sub(block_start) as usize;
            let to = ((offset + size - block_start).min(raw.len() as u64)) as usize;
            window.extend_from_slice(&raw[from..to]);
        }
        Ok(Bytes::from(window))
    }
}
