//! The cache store interface
//!
//! Implemented by the pak-backed store and by decorators wrapping it. The
//! legacy key/value surface is synchronous; the structured surface is
//! batched with per-request completion callbacks so that a tiered cache
//! facade can fan requests across stores.

use crate::store::requests::{
    GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest, GetValueResponse,
    PutRequest, PutResponse, PutValueRequest, PutValueResponse, RequestOwner,
};
use crate::types::PutStatus;
use bytes::Bytes;

pub trait CacheStore: Send + Sync {
    /// Index-only existence probe; no payload IO
    fn cached_data_probably_exists(&self, key: &str) -> bool;

    /// Read and CRC-verify a payload; any failure is a miss, never a panic
    fn get_cached_data(&self, key: &str) -> Option<Bytes>;

    /// Store a payload under a key
    ///
    /// With `put_even_if_exists`, an existing same-size entry is rewritten
    /// in place; an existing different-size entry is dropped from the index
    /// and the payload appended fresh.
    fn put_cached_data(&self, key: &str, data: &[u8], put_even_if_exists: bool) -> PutStatus;

    /// Drop a key from the index; payload bytes are never reclaimed
    fn remove_cached_data(&self, key: &str, transient: bool);

    /// Store records; completion is invoked exactly once per request
    fn put(
        &self,
        requests: Vec<PutRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(PutResponse),
    );

    /// Load records according to their policies
    fn get(
        &self,
        requests: Vec<GetRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetResponse),
    );

    /// Store anonymous values
    fn put_value(
        &self,
        requests: Vec<PutValueRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(PutValueResponse),
    );

    /// Load anonymous values
    fn get_value(
        &self,
        requests: Vec<GetValueRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetValueResponse),
    );

    /// Read raw byte windows of values, batching repeated reads of the
    /// same value across requests
    fn get_chunks(
        &self,
        requests: Vec<GetChunkRequest>,
        owner: &RequestOwner,
        on_complete: &mut dyn FnMut(GetChunkResponse),
    );
}
