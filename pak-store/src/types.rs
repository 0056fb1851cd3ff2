//! Common types for the pak store

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a legacy put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    /// The data is stored in this cache (either just written, or already
    /// present)
    Cached,
    /// The data could not be stored
    NotCached,
}

/// Completion status of a structured operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

/// Configuration for a pak store
#[derive(Debug, Clone)]
pub struct PakStoreOptions {
    /// Largest compressed payload kept inline in a value package, in KiB
    pub max_value_size_kb: u64,
    /// Largest total attachment size kept inline in a record package, in KiB
    pub max_record_size_kb: u64,
    /// Append every accessed key to this log, for cook auditing
    pub access_log_path: Option<PathBuf>,
}

impl Default for PakStoreOptions {
    fn default() -> Self {
        Self {
            max_value_size_kb: 1024,
            max_record_size_kb: 256,
            access_log_path: None,
        }
    }
}

/// Snapshot of store usage counters
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreStats {
    pub gets: u64,
    pub get_hits: u64,
    pub puts: u64,
    pub put_hits: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Outcome of merging one pak store into another
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeStats {
    /// Entries copied because they were absent from the target
    pub copied: usize,
    /// Entries skipped because the target already had them
    pub skipped: usize,
    /// Entries that failed to read from the source
    pub failed: usize,
}

#[derive(Debug, Default)]
pub(crate) struct UsageCounters {
    gets: AtomicU64,
    get_hits: AtomicU64,
    puts: AtomicU64,
    put_hits: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl UsageCounters {
    pub fn record_get(&self, hit: bool, bytes: u64) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.get_hits.fetch_add(1, Ordering::Relaxed);
            self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn record_put(&self, hit: bool, bytes: u64) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.put_hits.fetch_add(1, Ordering::Relaxed);
            self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StoreStats {
        StoreStats {
            gets: self.gets.load(Ordering::Relaxed),
            get_hits: self.get_hits.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            put_hits: self.put_hits.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
