//! Cache policies
//!
//! A policy is a bitmask deciding what an operation may do at this cache
//! tier: whether it may query, whether it may store, and whether payload
//! or metadata transfer should be skipped. Operations a policy does not
//! permit are skipped without error, which is what lets a tiered cache
//! facade route one request through several stores.

use crate::value::ValueId;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bitmask policy for a single cache operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy(u32);

impl CachePolicy {
    /// Permit nothing
    pub const NONE: Self = Self(0);
    /// Permit reading from this store
    pub const QUERY_LOCAL: Self = Self(1 << 0);
    /// Permit writing to this store
    pub const STORE_LOCAL: Self = Self(1 << 1);
    /// Confirm existence without transferring payload bytes
    pub const SKIP_DATA: Self = Self(1 << 2);
    /// Do not load record metadata
    pub const SKIP_META: Self = Self(1 << 3);
    /// Allow a record to load with some values missing their content
    pub const PARTIAL_RECORD: Self = Self(1 << 4);

    /// Query and store
    pub const DEFAULT: Self = Self(Self::QUERY_LOCAL.0 | Self::STORE_LOCAL.0);

    /// Flags that apply to a record as a whole, not to individual values
    const RECORD_ONLY: Self = Self(Self::SKIP_META.0 | Self::PARTIAL_RECORD.0);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for CachePolicy {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CachePolicy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CachePolicy {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Policy for a record operation, with optional per-value overrides
#[derive(Debug, Clone)]
pub struct RecordPolicy {
    record: CachePolicy,
    /// Sorted by value id
    overrides: Vec<(ValueId, CachePolicy)>,
}

impl RecordPolicy {
    pub fn new(record: CachePolicy) -> Self {
        Self {
            record,
            overrides: Vec::new(),
        }
    }

    pub fn record_policy(&self) -> CachePolicy {
        self.record
    }

    /// Policy for one value: its override, or the record policy with
    /// record-only flags masked off
    pub fn value_policy(&self, id: ValueId) -> CachePolicy {
        match self.overrides.binary_search_by_key(&id, |(id, _)| *id) {
            Ok(found) => self.overrides[found].1,
            Err(_) => self.record.without(CachePolicy::RECORD_ONLY),
        }
    }
}

impl Default for RecordPolicy {
    fn default() -> Self {
        Self::new(CachePolicy::DEFAULT)
    }
}

impl From<CachePolicy> for RecordPolicy {
    fn from(record: CachePolicy) -> Self {
        Self::new(record)
    }
}

/// Builder for a [`RecordPolicy`] with per-value overrides
pub struct RecordPolicyBuilder {
    record: CachePolicy,
    overrides: Vec<(ValueId, CachePolicy)>,
}

impl RecordPolicyBuilder {
    pub fn new(record: CachePolicy) -> Self {
        Self {
            record,
            overrides: Vec::new(),
        }
    }

    /// Override the policy for a single value; the last write for an id wins
    pub fn with_value_policy(mut self, id: ValueId, policy: CachePolicy) -> Self {
        self.overrides.retain(|(existing, _)| *existing != id);
        self.overrides.push((id, policy));
        self
    }

    pub fn build(mut self) -> RecordPolicy {
        self.overrides.sort_by_key(|(id, _)| *id);
        RecordPolicy {
            record: self.record,
            overrides: self.overrides,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_and_without() {
        let policy = CachePolicy::QUERY_LOCAL | CachePolicy::SKIP_DATA;
        assert!(policy.contains(CachePolicy::QUERY_LOCAL));
        assert!(!policy.contains(CachePolicy::STORE_LOCAL));
        assert!(policy.intersects(CachePolicy::DEFAULT));
        assert!(!policy.without(CachePolicy::SKIP_DATA).contains(CachePolicy::SKIP_DATA));
    }

    #[test]
    fn value_policy_masks_record_only_flags() {
        let policy = RecordPolicy::new(
            CachePolicy::DEFAULT | CachePolicy::SKIP_META | CachePolicy::PARTIAL_RECORD,
        );
        let id = ValueId::from_name("LODs");
        assert_eq!(policy.value_policy(id), CachePolicy::DEFAULT);
    }

    #[test]
    fn value_policy_override_wins() {
        let id = ValueId::from_name("Shadow");
        let policy = RecordPolicyBuilder::new(CachePolicy::DEFAULT)
            .with_value_policy(id, CachePolicy::QUERY_LOCAL | CachePolicy::SKIP_DATA)
            .build();
        assert!(policy.value_policy(id).contains(CachePolicy::SKIP_DATA));
        assert!(!policy.value_policy(ValueId::from_name("Other")).contains(CachePolicy::SKIP_DATA));
    }
}
