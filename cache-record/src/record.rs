//! Records: structured cache entries with metadata and named values

use crate::error::{RecordError, Result};
use crate::key::CacheKey;
use crate::value::{Value, ValueId, ValueWithId};

/// A structured cache entry: key, metadata object, and named values
///
/// Values are kept sorted by id, which makes record comparison and package
/// serialization deterministic.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    key: CacheKey,
    meta: serde_json::Value,
    values: Vec<ValueWithId>,
}

impl CacheRecord {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Metadata object; `Null` when the record carries none
    pub fn meta(&self) -> &serde_json::Value {
        &self.meta
    }

    pub fn values(&self) -> &[ValueWithId] {
        &self.values
    }

    pub fn value(&self, id: ValueId) -> Option<&ValueWithId> {
        self.values
            .binary_search_by_key(&id, ValueWithId::id)
            .ok()
            .map(|found| &self.values[found])
    }
}

/// Builder for a [`CacheRecord`]
pub struct CacheRecordBuilder {
    key: CacheKey,
    meta: serde_json::Value,
    values: Vec<ValueWithId>,
}

impl CacheRecordBuilder {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            meta: serde_json::Value::Null,
            values: Vec::new(),
        }
    }

    pub fn set_meta(&mut self, meta: serde_json::Value) -> &mut Self {
        self.meta = meta;
        self
    }

    /// Add a value; ids must be unique within a record
    pub fn add_value(&mut self, id: ValueId, value: Value) -> Result<&mut Self> {
        match self.values.binary_search_by_key(&id, ValueWithId::id) {
            Ok(_) => Err(RecordError::DuplicateValueId(id)),
            Err(insert_at) => {
                self.values.insert(insert_at, ValueWithId::new(id, value));
                Ok(self)
            }
        }
    }

    pub fn build(self) -> CacheRecord {
        CacheRecord {
            key: self.key,
            meta: self.meta,
            values: self.values,
        }
    }
}
