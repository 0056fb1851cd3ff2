//! Binary packages for records and values
//!
//! A package is the serialized form of a record or a bare value: the key,
//! the metadata object, the (id, hash, size) tuple per value, and zero or
//! more inline attachments holding compressed content. Attachments are
//! addressed by raw hash; the store externalizes any attachment it wants
//! shared across entries and leaves the hash/size reference behind.
//!
//! Layout, little-endian, CRC-32 over the whole body as the trailing four
//! bytes:
//!
//! ```text
//! magic        [u8; 4]
//! kind         u8          1 = record, 2 = value
//! reserved     [u8; 3]
//! bucket_len   u16, bucket utf-8 bytes
//! key_hash     [u8; 20]
//! record kind: meta_len u32, meta bytes (serde_json), value_count u32,
//!              (id [u8; 12], raw_hash [u8; 20], raw_size u64) * count
//! value kind:  raw_hash [u8; 20], raw_size u64
//! att_count    u32, (len u32, encoded buffer bytes) * count
//! crc          u32
//! ```

use crate::error::{RecordError, Result};
use crate::key::CacheKey;
use crate::record::CacheRecord;
use crate::value::{Value, ValueId};
use blockbuf::{CompressedBuffer, RawHash};
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;
use std::io::{Cursor, Read};

/// Magic bytes at the start of every package
pub const PACKAGE_MAGIC: [u8; 4] = *b"DDP1";

const KIND_RECORD: u8 = 1;
const KIND_VALUE: u8 = 2;

/// One value entry within a record package: the reference without data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageValue {
    pub id: ValueId,
    pub raw_hash: RawHash,
    pub raw_size: u64,
}

impl PackageValue {
    /// The reference form of this entry
    pub fn as_value(&self) -> Value {
        Value::reference(self.raw_hash, self.raw_size)
    }
}

/// Serialized form of a [`CacheRecord`]
#[derive(Debug, Clone)]
pub struct RecordPackage {
    key: CacheKey,
    meta: serde_json::Value,
    values: Vec<PackageValue>,
    attachments: Vec<CompressedBuffer>,
}

impl RecordPackage {
    /// Package a record; every value's data starts out as an inline
    /// attachment, deduplicated by raw hash
    pub fn from_record(record: &CacheRecord) -> Self {
        let values = record
            .values()
            .iter()
            .map(|value| PackageValue {
                id: value.id(),
                raw_hash: value.value().raw_hash(),
                raw_size: value.value().raw_size(),
            })
            .collect();

        let mut package = Self {
            key: record.key().clone(),
            meta: record.meta().clone(),
            values,
            attachments: Vec::new(),
        };
        for value in record.values() {
            if let Some(data) = value.value().data() {
                package.add_attachment(data.clone());
            }
        }
        package
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn meta(&self) -> &serde_json::Value {
        &self.meta
    }

    pub fn values(&self) -> &[PackageValue] {
        &self.values
    }

    pub fn attachments(&self) -> &[CompressedBuffer] {
        &self.attachments
    }

    pub fn find_attachment(&self, raw_hash: RawHash) -> Option<&CompressedBuffer> {
        self.attachments
            .iter()
            .find(|attachment| attachment.raw_hash() == raw_hash)
    }

    /// Add an attachment unless one with the same hash is already present
    pub fn add_attachment(&mut self, attachment: CompressedBuffer) {
        if self.find_attachment(attachment.raw_hash()).is_none() {
            self.attachments.push(attachment);
        }
    }

    /// Detach the attachment with the given hash, if present
    pub fn remove_attachment(&mut self, raw_hash: RawHash) -> Option<CompressedBuffer> {
        let found = self
            .attachments
            .iter()
            .position(|attachment| attachment.raw_hash() == raw_hash)?;
        Some(self.attachments.remove(found))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_common_header(&mut out, KIND_RECORD, &self.key);

        let meta_bytes = if self.meta.is_null() {
            Vec::new()
        } else {
            serde_json::to_vec(&self.meta)?
        };
        out.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&meta_bytes);

        out.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for value in &self.values {
            out.extend_from_slice(value.id.as_bytes());
            out.extend_from_slice(value.raw_hash.as_bytes());
            out.extend_from_slice(&value.raw_size.to_le_bytes());
        }

        write_attachments(&mut out, &self.attachments);
        append_crc(&mut out);
        Ok(out)
    }

    /// Parse and validate a record package
    ///
    /// Checks the magic, kind, CRC, value ordering, and attachment
    /// uniqueness; any failure means the bytes cannot be trusted and the
    /// caller treats the entry as a miss.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let body = check_crc(bytes)?;
        let mut cursor = Cursor::new(body);
        let key = read_common_header(&mut cursor, KIND_RECORD)?;

        let meta_len = cursor.read_u32::<LittleEndian>()? as usize;
        let meta_bytes = read_exact(&mut cursor, meta_len)?;
        let meta = if meta_bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&meta_bytes)?
        };

        let value_count = cursor.read_u32::<LittleEndian>()?;
        let mut values = Vec::with_capacity(value_count as usize);
        for _ in 0..value_count {
            let id_bytes = read_exact(&mut cursor, ValueId::LEN)?;
            let id = ValueId::from_slice(&id_bytes).unwrap_or_else(ValueId::null);
            let hash_bytes = read_exact(&mut cursor, RawHash::LEN)?;
            let raw_hash = RawHash::from_slice(&hash_bytes).unwrap_or_else(RawHash::zero);
            let raw_size = cursor.read_u64::<LittleEndian>()?;
            values.push(PackageValue {
                id,
                raw_hash,
                raw_size,
            });
        }
        for pair in values.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(RecordError::DuplicateValueId(pair[0].id));
            }
            if pair[0].id > pair[1].id {
                return Err(RecordError::UnsortedValues);
            }
        }

        let attachments = read_attachments(&mut cursor)?;
        Ok(Self {
            key,
            meta,
            values,
            attachments,
        })
    }
}

/// Serialized form of a single anonymous [`Value`]
#[derive(Debug, Clone)]
pub struct ValuePackage {
    key: CacheKey,
    raw_hash: RawHash,
    raw_size: u64,
    attachment: Option<CompressedBuffer>,
}

impl ValuePackage {
    /// Package a value; data, when present, becomes the inline attachment
    pub fn from_value(key: CacheKey, value: &Value) -> Self {
        Self {
            key,
            raw_hash: value.raw_hash(),
            raw_size: value.raw_size(),
            attachment: value.data().cloned(),
        }
    }

    /// Package a bare reference with no inline attachment
    pub fn from_reference(key: CacheKey, raw_hash: RawHash, raw_size: u64) -> Self {
        Self {
            key,
            raw_hash,
            raw_size,
            attachment: None,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn raw_hash(&self) -> RawHash {
        self.raw_hash
    }

    pub fn raw_size(&self) -> u64 {
        self.raw_size
    }

    pub fn attachment(&self) -> Option<&CompressedBuffer> {
        self.attachment.as_ref()
    }

    /// Detach the inline attachment, leaving a bare reference
    pub fn remove_attachment(&mut self) -> Option<CompressedBuffer> {
        self.attachment.take()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_common_header(&mut out, KIND_VALUE, &self.key);
        out.extend_from_slice(self.raw_hash.as_bytes());
        out.extend_from_slice(&self.raw_size.to_le_bytes());

        let attachments: Vec<CompressedBuffer> = self.attachment.iter().cloned().collect();
        write_attachments(&mut out, &attachments);
        append_crc(&mut out);
        Ok(out)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let body = check_crc(bytes)?;
        let mut cursor = Cursor::new(body);
        let key = read_common_header(&mut cursor, KIND_VALUE)?;

        let hash_bytes = read_exact(&mut cursor, RawHash::LEN)?;
        let raw_hash = RawHash::from_slice(&hash_bytes).unwrap_or_else(RawHash::zero);
        let raw_size = cursor.read_u64::<LittleEndian>()?;

        let mut attachments = read_attachments(&mut cursor)?;
        if attachments.len() > 1 {
            return Err(RecordError::DuplicateAttachment(
                attachments[1].raw_hash().to_string(),
            ));
        }
        Ok(Self {
            key,
            raw_hash,
            raw_size,
            attachment: attachments.pop(),
        })
    }
}

fn write_common_header(out: &mut Vec<u8>, kind: u8, key: &CacheKey) {
    out.extend_from_slice(&PACKAGE_MAGIC);
    out.push(kind);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&(key.bucket().len() as u16).to_le_bytes());
    out.extend_from_slice(key.bucket().as_bytes());
    out.extend_from_slice(key.hash().as_bytes());
}

fn read_common_header(cursor: &mut Cursor<&[u8]>, expected_kind: u8) -> Result<CacheKey> {
    let magic = read_exact(cursor, 4)?;
    if magic != PACKAGE_MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(&magic);
        return Err(RecordError::InvalidMagic(found));
    }
    let kind = cursor.read_u8()?;
    if kind != expected_kind {
        return Err(RecordError::UnknownKind(kind));
    }
    let _reserved = read_exact(cursor, 3)?;

    let bucket_len = cursor.read_u16::<LittleEndian>()? as usize;
    let bucket_bytes = read_exact(cursor, bucket_len)?;
    let bucket = String::from_utf8(bucket_bytes)
        .map_err(|err| RecordError::InvalidBucket(err.to_string()))?;
    let hash_bytes = read_exact(cursor, RawHash::LEN)?;
    let hash = RawHash::from_slice(&hash_bytes).unwrap_or_else(RawHash::zero);
    CacheKey::new(bucket, hash)
}

fn write_attachments(out: &mut Vec<u8>, attachments: &[CompressedBuffer]) {
    out.extend_from_slice(&(attachments.len() as u32).to_le_bytes());
    for attachment in attachments {
        let encoded = attachment.as_bytes();
        out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        out.extend_from_slice(encoded);
    }
}

fn read_attachments(cursor: &mut Cursor<&[u8]>) -> Result<Vec<CompressedBuffer>> {
    let count = cursor.read_u32::<LittleEndian>()?;
    let mut attachments: Vec<CompressedBuffer> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        let encoded = read_exact(cursor, len)?;
        let attachment = CompressedBuffer::from_encoded(Bytes::from(encoded))?;
        if attachments
            .iter()
            .any(|existing| existing.raw_hash() == attachment.raw_hash())
        {
            return Err(RecordError::DuplicateAttachment(
                attachment.raw_hash().to_string(),
            ));
        }
        attachments.push(attachment);
    }
    Ok(attachments)
}

fn read_exact(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if (len as u64) > remaining {
        return Err(RecordError::Truncated {
            expected: cursor.position() + len as u64,
            actual: cursor.get_ref().len() as u64,
        });
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Split off and verify the trailing CRC, returning the body
fn check_crc(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < 4 {
        return Err(RecordError::Truncated {
            expected: 4,
            actual: bytes.len() as u64,
        });
    }
    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(RecordError::CrcMismatch { expected, actual });
    }
    Ok(body)
}

fn append_crc(out: &mut Vec<u8>) {
    let crc = crc32fast::hash(out);
    out.extend_from_slice(&crc.to_le_bytes());
}
