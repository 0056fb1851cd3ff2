//! Compression decorator
//!
//! Wraps another store and normalizes compression. Legacy payloads are
//! stored as a 4-byte uncompressed-size prefix followed by the compressed
//! bytes. Structured values are re-encoded to the required method and level
//! before delegating, unless their existing encoding already satisfies it,
//! so a pak produced through this wrapper has uniform content encoding.

use crate::store::requests::{
    GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest, GetValueResponse,
    PutRequest, PutResponse, PutValueRequest, PutValueResponse, RequestOwner,
};
use crate::store::traits::CacheStore;
use crate::types::{PutStatus, Status};
use blockbuf::compress::{compress_block, CompressionMethod};
use blockbuf::decompress::decompress_block;
use blockbuf::CompressedBuffer;
use bytes::Bytes;
use cache_record::{CacheRecord, CacheRecordBuilder, Value};
use tracing::{trace, warn};

pub struct CompressedStoreWrapper<S> {
    inner: S,
    method: CompressionMethod,
    level: u8,
}

impl<S: CacheStore> CompressedStoreWrapper<S> {
    pub fn new(inner: S, method: CompressionMethod, level: u8) -> Self {
        Self {
            inner,
            method,
            level,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Whether an existing encoding already meets the required target
    fn satisfies(&self, buffer: &CompressedBuffer) -> bool {
        buffer.method() == self.method && buffer.level() >= self.level
    }

    /// Re-encode one value to the required method and level
    fn reencode_value(&self, name: &str, value: &Value) -> Option<Value> {
        let Some(data) = value.data() else {
            return Some(value.clone());
        };
        if self.satisfies(data) {
            return Some(value.clone());
        }
        let raw = match data.decompress() {
            Ok(raw) => raw,
            Err(err) => {
                warn!("{name}: failed to decompress value {} for re-encoding: {err}", value.raw_hash());
                return None;
            }
        };
        match CompressedBuffer::compress(&raw, self.method, self.level) {
            Ok(buffer) => {
                trace!(
                    "{name}: re-encoded value {} from {} to {}",
                    value.raw_hash(),
                    data.method(),
                    self.method
                );
                Some(Value::from_buffer(buffer))
            }
            Err(err) => {
                warn!("{name}: failed to re-encode value {}: {err}", value.raw_hash());
                None
            }
        }
    }

    fn reencode_record(&self, name: &str, record: &CacheRecord) -> Option<CacheRecord> {
        if record
            .values()
            .iter()
            .all(|value| value.value().data().is_none_or(|data| self.satisfies(data)))
        {
            return Some(record.clone());
        }

        let mut builder = CacheRecordBuilder::new(record.key().clone());
        builder.set_meta(record.meta().clone());
        for value in record.values() {
            let reencoded = self.reencode_value(name, value.value())?;
            // Ids come from a valid record, so they are unique.
            let _ = builder.add_value(value.id(), reencoded);
        }
        Some(builder.build())
    }
}

impl<S: CacheStore> CacheStore for CompressedStoreWrapper<S> {
    fn cached_data_probably_exists(&self, key: &str) -> bool {
        self.inner.cached_data_probably_exists(key)
    }

    /// Read the size prefix, then decompress the rest to exactly that size
    fn get_cached_data(&self, key: &str) -> Option<Bytes> {
        let stored = self.inner.get_cached_data(key)?;
        if stored.len() < 4 {
            warn!("Compressed entry for {key} is too short ({} bytes)", stored.len());
            return None;
        }
        let raw_size = i32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        if raw_size < 0 {
            warn!("Compressed entry for {key} declares negative size {raw_size}");
            return None;
        }
        match decompress_block(&stored[4..], self.method, raw_size as usize) {
            Ok(raw) => Some(Bytes::from(raw)),
            Err(err) => {
                warn!("Failed to decompress entry for {key}: {err}");
                None
            }
        }
    }

    /// Prefix the uncompressed size, compress the payload, and delegate
    fn put_cached_data(&self, key: &str, data: &[u8], put_even_if_exists: bool) -> PutStatus {
        if data.len() > i32::MAX as usize {
            warn!("Payload for {key} is too large to carry a 32-bit size prefix");
            return PutStatus::NotCached;
        }
        let compressed = match compress_block(data, self.method, self.level) {
            Ok(compressed) => compressed,
            Err(err) => {
                warn!("Failed to compress payload for {key}: {err}");
                return PutStatus::NotCached;
            }
        };
        let mut stored = Vec::with_capacity(4 + compressed.len());
        stored.extend_from_slice(&(data.len() as i32).to_le_bytes());
        stored.extend_from_slice(&compressed);
        self.inner.put_cached_data(key, &stored, put_even_if_exists)
    }

    fn remove_cached_data(&self, key: &str, transient: bool) {
        self.inner.remove_cached_data(key, transient);
    }

    /// Re-encode record values to the required compression, then delegate
    fn put(
        &self,
        requests: Vec<PutRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(PutResponse),
    ) {
        let _scope = owner.begin_task();
        for request in requests {
            match self.reencode_record(&request.name, &request.record) {
                Some(record) => self.inner.put(
                    vec![PutRequest { record, ..request }],
                    owner,
                    &mut *on_complete,
                ),
                None => on_complete(PutResponse {
                    name: request.name,
                    key: request.record.key().clone(),
                    user_data: request.user_data,
                    status: Status::Error,
                }),
            }
        }
    }

    fn get(
        &self,
        requests: Vec<GetRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetResponse),
    ) {
        self.inner.get(requests, owner, on_complete);
    }

    fn put_value(
        &self,
        requests: Vec<PutValueRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(PutValueResponse),
    ) {
        let _scope = owner.begin_task();
        for request in requests {
            match self.reencode_value(&request.name, &request.value) {
                Some(value) => self.inner.put_value(
                    vec![PutValueRequest { value, ..request }],
                    owner,
                    &mut *on_complete,
                ),
                None => on_complete(PutValueResponse {
                    name: request.name,
                    key: request.key,
                    user_data: request.user_data,
                    status: Status::Error,
                }),
            }
        }
    }

    fn get_value(
        &self,
        requests: Vec<GetValueRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetValueResponse),
    ) {
        self.inner.get_value(requests, owner, on_complete);
    }

    fn get_chunks(
        &self,
        requests: Vec<GetChunkRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetChunkResponse),
    ) {
        self.inner.get_chunks(requests, owner, on_complete);
    }
}
