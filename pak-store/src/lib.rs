//! Pak-file-backed derived-data cache store
//!
//! A local, append-only, content-addressed cache for build artifacts
//! (shader bytecode, cooked assets, derived data). Entries live in a single
//! binary pak file: payload bytes back-to-back, followed by a serialized
//! index and a fixed trailer. The index is held fully in memory; payload
//! reads verify a per-entry CRC, and the index itself is CRC- and
//! magic-checked on load.
//!
//! On top of the raw key/value surface sits a structured layer: records
//! (key + metadata + named values) and bare values serialize to binary
//! packages stored under `Buckets/<key>`, with each value's compressed
//! content externalized to `Content/<hash>` entries shared across records.

pub mod container;
pub mod error;
pub mod index;
pub mod store;
pub mod types;

pub use error::{PakError, Result};
pub use index::{IndexEntry, PakIndex};
pub use store::access_log::AccessLogWriter;
pub use store::compressed::CompressedStoreWrapper;
pub use store::maintenance::sort_and_copy;
pub use store::pak_store::PakFileStore;
pub use store::requests::{
    GetChunkRequest, GetChunkResponse, GetRequest, GetResponse, GetValueRequest, GetValueResponse,
    PutRequest, PutResponse, PutValueRequest, PutValueResponse, RequestOwner,
};
pub use store::traits::CacheStore;
pub use types::{MergeStats, PakStoreOptions, PutStatus, Status, StoreStats};
