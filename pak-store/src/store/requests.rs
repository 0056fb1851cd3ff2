//! Request and response types for the structured store surface
//!
//! Structured operations are batched: the caller hands over a slice of
//! requests, a request owner, and a completion callback that is invoked
//! exactly once per request with a status. The owner registers in-flight
//! work and carries the cooperative cancellation flag; cancellation is
//! checked by the owner's scheduler, not by the stores themselves.

use crate::types::Status;
use blockbuf::RawHash;
use bytes::Bytes;
use cache_record::{CachePolicy, CacheKey, CacheRecord, RecordPolicy, Value, ValueId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Tracks in-flight batches and carries the cancellation flag
#[derive(Debug, Default)]
pub struct RequestOwner {
    canceled: AtomicBool,
    active: AtomicUsize,
}

impl RequestOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit of work; the guard deregisters on drop
    pub fn begin_task(&self) -> TaskScope<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        TaskScope { owner: self }
    }

    /// Request cooperative cancellation of work scheduled on this owner
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Guard for one registered unit of work
pub struct TaskScope<'owner> {
    owner: &'owner RequestOwner,
}

impl Drop for TaskScope<'_> {
    fn drop(&mut self) {
        self.owner.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Request to store one record
#[derive(Debug, Clone)]
pub struct PutRequest {
    /// Debug name of the requesting build step, for logs
    pub name: String,
    pub record: CacheRecord,
    pub policy: RecordPolicy,
    pub user_data: u64,
}

#[derive(Debug, Clone)]
pub struct PutResponse {
    pub name: String,
    pub key: CacheKey,
    pub user_data: u64,
    pub status: Status,
}

/// Request to load one record
#[derive(Debug, Clone)]
pub struct GetRequest {
    pub name: String,
    pub key: CacheKey,
    pub policy: RecordPolicy,
    pub user_data: u64,
}

#[derive(Debug, Clone)]
pub struct GetResponse {
    pub name: String,
    pub key: CacheKey,
    /// The loaded record on a hit; `None` on a miss
    pub record: Option<CacheRecord>,
    pub user_data: u64,
    pub status: Status,
}

/// Request to store one anonymous value
#[derive(Debug, Clone)]
pub struct PutValueRequest {
    pub name: String,
    pub key: CacheKey,
    pub value: Value,
    pub policy: CachePolicy,
    pub user_data: u64,
}

#[derive(Debug, Clone)]
pub struct PutValueResponse {
    pub name: String,
    pub key: CacheKey,
    pub user_data: u64,
    pub status: Status,
}

/// Request to load one anonymous value
#[derive(Debug, Clone)]
pub struct GetValueRequest {
    pub name: String,
    pub key: CacheKey,
    pub policy: CachePolicy,
    pub user_data: u64,
}

#[derive(Debug, Clone)]
pub struct GetValueResponse {
    pub name: String,
    pub key: CacheKey,
    pub value: Option<Value>,
    pub user_data: u64,
    pub status: Status,
}

/// Request for a raw byte window of a value
///
/// `id` is null when the key names an anonymous value rather than a record.
#[derive(Debug, Clone)]
pub struct GetChunkRequest {
    pub name: String,
    pub key: CacheKey,
    pub id: ValueId,
    pub raw_offset: u64,
    pub raw_size: u64,
    pub policy: CachePolicy,
    pub user_data: u64,
}

#[derive(Debug, Clone)]
pub struct GetChunkResponse {
    pub name: String,
    pub key: CacheKey,
    pub id: ValueId,
    pub raw_offset: u64,
    /// Window size clamped to the value's raw size
    pub raw_size: u64,
    pub raw_hash: RawHash,
    /// The decompressed window; `None` for existence-only requests and misses
    pub data: Option<Bytes>,
    pub user_data: u64,
    pub status: Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_tracks_tasks_and_cancellation() {
        let owner = RequestOwner::new();
        assert_eq!(owner.active_tasks(), 0);
        {
            let _outer = owner.begin_task();
            let _inner = owner.begin_task();
            assert_eq!(owner.active_tasks(), 2);
        }
        assert_eq!(owner.active_tasks(), 0);

        assert!(!owner.is_canceled());
        owner.cancel();
        assert!(owner.is_canceled());
    }
}
