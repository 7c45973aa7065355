//! Process-wide owner → record-id cache.
//!
//! An explicit registry object, constructed at process start (or per test,
//! or per tenant shard); no implicit global singleton. The cache is
//! advisory, never authoritative: entries are populated on successful
//! resolution or explicit registration and evicted whenever a load against
//! the cached id fails, forcing re-resolution against the ledger on the
//! next access. All mutations are single-operation map updates; callers
//! must re-validate check-then-act sequences against ledger state.

use dashmap::DashMap;
use tracing::debug;

use mnemos_core::types::{OwnerId, RecordId};

/// Owner → last-known ledger record id.
#[derive(Debug, Default)]
pub struct OwnerRegistry {
    entries: DashMap<OwnerId, RecordId>,
}

impl OwnerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-known record id for an owner, if any.
    pub fn get(&self, owner: &OwnerId) -> Option<RecordId> {
        self.entries.get(owner).map(|entry| entry.value().clone())
    }

    /// Remember the record id for an owner.
    pub fn insert(&self, owner: OwnerId, record_id: RecordId) {
        debug!(owner = %owner, record_id = %record_id, "registry: cached record id");
        self.entries.insert(owner, record_id);
    }

    /// Drop an owner's entry after a failed load. Returns true if an
    /// entry was present.
    pub fn evict(&self, owner: &OwnerId) -> bool {
        let evicted = self.entries.remove(owner).is_some();
        if evicted {
            debug!(owner = %owner, "registry: evicted stale entry");
        }
        evicted
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_evict_cycle() {
        let registry = OwnerRegistry::new();
        let owner = OwnerId::new("0xabc");

        assert!(registry.get(&owner).is_none());

        registry.insert(owner.clone(), RecordId::new("rec-1"));
        assert_eq!(registry.get(&owner), Some(RecordId::new("rec-1")));

        assert!(registry.evict(&owner));
        assert!(!registry.evict(&owner));
        assert!(registry.get(&owner).is_none());
    }

    #[test]
    fn test_insert_overwrites() {
        let registry = OwnerRegistry::new();
        let owner = OwnerId::new("0xabc");
        registry.insert(owner.clone(), RecordId::new("rec-1"));
        registry.insert(owner.clone(), RecordId::new("rec-2"));
        assert_eq!(registry.get(&owner), Some(RecordId::new("rec-2")));
        assert_eq!(registry.len(), 1);
    }
}
