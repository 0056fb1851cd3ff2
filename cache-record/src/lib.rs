//! Cache key, value, and record model for the derived-data store
//!
//! A cache entry is either a bare value (one content-addressed payload) or a
//! record: a key, a metadata object, and an ordered set of named values.
//! Records and values serialize to binary packages; each value's compressed
//! content can travel inline in the package or be externalized by the store
//! into separate content-addressed entries shared across records.

pub mod error;
pub mod key;
pub mod package;
pub mod policy;
pub mod record;
pub mod value;

pub use error::{RecordError, Result};
pub use key::CacheKey;
pub use package::{PackageValue, RecordPackage, ValuePackage};
pub use policy::{CachePolicy, RecordPolicy, RecordPolicyBuilder};
pub use record::{CacheRecord, CacheRecordBuilder};
pub use value::{Value, ValueId, ValueWithId};
