//! The in-memory pak index
//!
//! Maps a string key to the location of its payload in the file. The index
//! is the single source of truth for which keys exist: a key without an
//! index entry is a miss even if stray bytes remain in the payload region.

use crate::error::{PakError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::{Cursor, Read};

/// Location and checksum of one stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: i64,
    pub size: i64,
    pub crc: u32,
}

/// In-memory index of a pak file
#[derive(Debug, Default)]
pub struct PakIndex {
    entries: HashMap<String, IndexEntry>,
}

impl PakIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: String, entry: IndexEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    /// Serialize all entries, sorted by key for a deterministic index
    ///
    /// Each entry is `u32` key length, key bytes, `i64` offset, `i64` size,
    /// `u32` CRC, little-endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();

        let mut out = Vec::new();
        for key in keys {
            let entry = &self.entries[key];
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&entry.offset.to_le_bytes());
            out.extend_from_slice(&entry.size.to_le_bytes());
            out.extend_from_slice(&entry.crc.to_le_bytes());
        }
        out
    }

    /// Parse exactly `num_items` entries, validating each against the
    /// payload region `[0, index_offset)`
    ///
    /// Rejects empty keys, non-positive sizes, offsets outside the payload
    /// region, short input, and trailing bytes after the last entry. On any
    /// failure no partially-populated index escapes.
    pub fn parse(bytes: &[u8], num_items: u32, index_offset: i64) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let mut entries = HashMap::with_capacity(num_items as usize);

        for item in 0..num_items {
            let key_len = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| short_index(item, num_items))? as usize;
            let remaining = bytes.len() as u64 - cursor.position();
            if key_len as u64 > remaining {
                return Err(short_index(item, num_items));
            }
            let mut key_bytes = vec![0u8; key_len];
            cursor
                .read_exact(&mut key_bytes)
                .map_err(|_| short_index(item, num_items))?;
            let key = String::from_utf8(key_bytes).map_err(|_| {
                PakError::CorruptIndex(format!("entry {item} has a non-utf8 key"))
            })?;

            let offset = cursor
                .read_i64::<LittleEndian>()
                .map_err(|_| short_index(item, num_items))?;
            let size = cursor
                .read_i64::<LittleEndian>()
                .map_err(|_| short_index(item, num_items))?;
            let crc = cursor
                .read_u32::<LittleEndian>()
                .map_err(|_| short_index(item, num_items))?;

            if key.is_empty() {
                return Err(PakError::CorruptIndex(format!("entry {item} has an empty key")));
            }
            if size <= 0 {
                return Err(PakError::CorruptIndex(format!(
                    "entry {key:?} has non-positive size {size}"
                )));
            }
            if offset < 0 || offset >= index_offset {
                return Err(PakError::CorruptIndex(format!(
                    "entry {key:?} at offset {offset} lies outside the payload region [0, {index_offset})"
                )));
            }
            entries.insert(key, IndexEntry { offset, size, crc });
        }

        if cursor.position() != bytes.len() as u64 {
            return Err(PakError::CorruptIndex(format!(
                "{} trailing bytes after {num_items} entries",
                bytes.len() as u64 - cursor.position()
            )));
        }
        if entries.len() != num_items as usize {
            return Err(PakError::CorruptIndex(format!(
                "parsed {} unique entries when {num_items} were expected",
                entries.len()
            )));
        }

        Ok(Self { entries })
    }
}

fn short_index(item: u32, num_items: u32) -> PakError {
    PakError::CorruptIndex(format!("index ends inside entry {item} of {num_items}"))
}
