//! In-memory ledger store
//!
//! Same contract as [`crate::storage::RocksStore`], kept in process memory. Used by
//! tests and by embedders that persist elsewhere.

use crate::{
    entry_set::{sum_amounts, EntrySet, Receipt},
    error::{Error, Result},
    storage::{replay_error, LedgerStore, StorageStats},
    types::{EntityId, EntryFilter, LedgerEntry, ReferenceId},
};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<LedgerEntry>,
    references: HashMap<(EntityId, ReferenceId), Receipt>,
}

impl Inner {
    fn sum(&self, filter: &EntryFilter) -> Result<i64> {
        sum_amounts(
            self.entries
                .iter()
                .filter(|e| filter.matches(e))
                .map(|e| e.amount),
        )
    }
}

/// Ledger store held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    /// Remaining appends to fail with `StoreUnavailable`
    fail_appends: AtomicU32,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` appends fail as if the backend were down
    pub fn fail_next_appends(&self, count: u32) {
        self.fail_appends.store(count, Ordering::SeqCst);
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl LedgerStore for MemoryStore {
    fn append(&self, set: &EntrySet) -> Result<Receipt> {
        set.validate()?;
        let fingerprint = set.fingerprint()?;

        if self.take_injected_failure() {
            return Err(Error::StoreUnavailable("injected failure".to_string()));
        }

        let mut inner = self.inner.write();

        let key = (set.entity_id().clone(), set.reference_id().clone());
        if let Some(existing) = inner.references.get(&key) {
            return Err(replay_error(set, existing, fingerprint));
        }

        set.check_requirements(|filter| inner.sum(filter))?;

        let next_sequence = inner.entries.len() as u64;
        let entries = set.materialize(next_sequence, Utc::now());
        let receipt = Receipt::for_entries(set, &entries, fingerprint);

        inner.entries.extend(entries);
        inner.references.insert(key, receipt.clone());

        Ok(receipt)
    }

    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    fn balances(&self, filters: &[EntryFilter]) -> Result<Vec<i64>> {
        let inner = self.inner.read();
        filters.iter().map(|f| inner.sum(f)).collect()
    }

    fn reference(&self, entity_id: &EntityId, reference_id: &ReferenceId) -> Result<Option<Receipt>> {
        let inner = self.inner.read();
        Ok(inner
            .references
            .get(&(entity_id.clone(), reference_id.clone()))
            .cloned())
    }

    fn stats(&self) -> Result<StorageStats> {
        let inner = self.inner.read();
        Ok(StorageStats {
            total_entries: inner.entries.len() as u64,
            total_entry_sets: inner.references.len() as u64,
        })
    }
}
