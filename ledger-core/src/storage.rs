//! Storage layer
//!
//! [`LedgerStore`] is the injected persistence contract. [`RocksStore`] is the durable
//! implementation; [`crate::memory::MemoryStore`] backs tests and embedded use.
//!
//! # Column Families
//!
//! - `entries` - Append-only entry log (key: sequence, big endian)
//! - `references` - Committed entry-set receipts (key: entity || reference)
//! - `indices` - Secondary indices (key: tag || entity or actor || sequence)

use crate::{
    entry_set::{sum_amounts, EntrySet, Receipt},
    error::{Error, Result},
    types::{ActorId, EntityId, EntryFilter, LedgerEntry, ReferenceId},
    Config,
};
use chrono::Utc;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode,
    Options, Snapshot, WriteBatch, WriteOptions, DB,
};
use std::sync::Arc;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_REFERENCES: &str = "references";
const CF_INDICES: &str = "indices";

/// Index tags
const IDX_ENTITY: u8 = b'e';
const IDX_ACTOR: u8 = b'a';

/// Persistence contract for the ledger
///
/// `append` must be all-or-nothing and must evaluate the idempotency check and the
/// entry-set's balance requirements atomically with the write.
pub trait LedgerStore: Send + Sync {
    /// Atomically append a balanced entry-set
    ///
    /// Returns [`Error::AlreadyProcessed`] for an identical replay and
    /// [`Error::ReferenceConflict`] when the reference was used with other content.
    fn append(&self, set: &EntrySet) -> Result<Receipt>;

    /// Entries matching the filter, in append order
    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>>;

    /// Sums for several filters, read from one consistent snapshot
    fn balances(&self, filters: &[EntryFilter]) -> Result<Vec<i64>>;

    /// Receipt of a committed reference
    fn reference(&self, entity_id: &EntityId, reference_id: &ReferenceId) -> Result<Option<Receipt>>;

    /// Storage statistics
    fn stats(&self) -> Result<StorageStats>;

    /// Sum for one filter
    fn balance(&self, filter: &EntryFilter) -> Result<i64> {
        Ok(self
            .balances(std::slice::from_ref(filter))?
            .first()
            .copied()
            .unwrap_or_default())
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Entries in the log
    pub total_entries: u64,
    /// Committed entry-sets, counted exactly
    pub total_entry_sets: u64,
}

/// Map a replayed reference to the right error
pub(crate) fn replay_error(set: &EntrySet, existing: &Receipt, fingerprint: [u8; 32]) -> Error {
    if existing.fingerprint == fingerprint {
        Error::AlreadyProcessed {
            entity_id: set.entity_id().clone(),
            reference_id: set.reference_id().clone(),
        }
    } else {
        tracing::error!(
            entity_id = %set.entity_id(),
            reference_id = %set.reference_id(),
            committed = %existing.fingerprint_hex(),
            attempted = %hex::encode(fingerprint),
            "Reference reused with different entries"
        );
        Error::ReferenceConflict {
            entity_id: set.entity_id().clone(),
            reference_id: set.reference_id().clone(),
        }
    }
}

/// RocksDB-backed ledger store
pub struct RocksStore {
    db: Arc<DB>,
    /// Serializes appends; holds the next free sequence
    next_sequence: Mutex<u64>,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_REFERENCES, Self::cf_options_references()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        let store = Self {
            db: Arc::new(db),
            next_sequence: Mutex::new(0),
            sync_writes: config.rocksdb.sync_writes,
        };

        let next = store.recover_next_sequence()?;
        *store.next_sequence.lock() = next;

        tracing::info!(path = ?path, next_sequence = next, "Opened RocksDB ledger store");

        Ok(store)
    }

    // Column family options

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_references() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::StoreUnavailable(format!("Column family {} not found", name)))
    }

    fn recover_next_sequence(&self) -> Result<u64> {
        let cf = self.cf(CF_ENTRIES)?;
        let mut iter = self.db.iterator_cf(&cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(decode_sequence(&key)? + 1)
            }
            None => Ok(0),
        }
    }

    // Index key helpers

    fn index_prefix(tag: u8, id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(5 + id.len() + 8);
        key.push(tag);
        key.extend_from_slice(&(id.len() as u32).to_be_bytes());
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn index_key(tag: u8, id: &str, sequence: u64) -> Vec<u8> {
        let mut key = Self::index_prefix(tag, id);
        key.extend_from_slice(&sequence.to_be_bytes());
        key
    }

    fn reference_key(entity_id: &EntityId, reference_id: &ReferenceId) -> Vec<u8> {
        let mut key = Self::index_prefix(IDX_ENTITY, entity_id.as_str());
        key.extend_from_slice(reference_id.as_str().as_bytes());
        key
    }

    // Snapshot reads

    fn scan_index(
        &self,
        snapshot: &Snapshot<'_>,
        tag: u8,
        id: &str,
        filter: &EntryFilter,
        out: &mut Vec<LedgerEntry>,
    ) -> Result<()> {
        let cf_indices = self.cf(CF_INDICES)?;
        let cf_entries = self.cf(CF_ENTRIES)?;
        let prefix = Self::index_prefix(tag, id);

        let iter = snapshot.iterator_cf(&cf_indices, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let sequence = decode_sequence(&key[prefix.len()..])?;
            let value = snapshot
                .get_cf(&cf_entries, sequence.to_be_bytes())?
                .ok_or_else(|| Error::StoreUnavailable(format!("Indexed entry {} missing", sequence)))?;
            let entry: LedgerEntry = bincode::deserialize(&value)?;
            if filter.matches(&entry) {
                out.push(entry);
            }
        }
        Ok(())
    }

    fn query_at(&self, snapshot: &Snapshot<'_>, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        let mut entries = Vec::new();

        if let Some(entity) = &filter.entity_id {
            self.scan_index(snapshot, IDX_ENTITY, entity.as_str(), filter, &mut entries)?;
        } else if let Some(actor) = &filter.actor_id {
            self.scan_index(snapshot, IDX_ACTOR, actor.as_str(), filter, &mut entries)?;
        } else {
            let cf_entries = self.cf(CF_ENTRIES)?;
            for item in snapshot.iterator_cf(&cf_entries, IteratorMode::Start) {
                let (_, value) = item?;
                let entry: LedgerEntry = bincode::deserialize(&value)?;
                if filter.matches(&entry) {
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }

    fn sum_at(&self, snapshot: &Snapshot<'_>, filter: &EntryFilter) -> Result<i64> {
        let entries = self.query_at(snapshot, filter)?;
        sum_amounts(entries.iter().map(|e| e.amount))
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl LedgerStore for RocksStore {
    fn append(&self, set: &EntrySet) -> Result<Receipt> {
        set.validate()?;
        let fingerprint = set.fingerprint()?;

        let cf_entries = self.cf(CF_ENTRIES)?;
        let cf_references = self.cf(CF_REFERENCES)?;
        let cf_indices = self.cf(CF_INDICES)?;

        // Writer critical section: idempotency, requirements, write
        let mut next_sequence = self.next_sequence.lock();

        let ref_key = Self::reference_key(set.entity_id(), set.reference_id());
        if let Some(bytes) = self.db.get_cf(&cf_references, &ref_key)? {
            let existing: Receipt = bincode::deserialize(&bytes)?;
            return Err(replay_error(set, &existing, fingerprint));
        }

        {
            let snapshot = self.db.snapshot();
            set.check_requirements(|filter| self.sum_at(&snapshot, filter))?;
        }

        let entries = set.materialize(*next_sequence, Utc::now());
        let receipt = Receipt::for_entries(set, &entries, fingerprint);

        let mut batch = WriteBatch::default();
        for entry in &entries {
            batch.put_cf(&cf_entries, entry.sequence.to_be_bytes(), bincode::serialize(entry)?);
            batch.put_cf(
                &cf_indices,
                Self::index_key(IDX_ENTITY, entry.entity_id.as_str(), entry.sequence),
                b"",
            );
            batch.put_cf(
                &cf_indices,
                Self::index_key(IDX_ACTOR, entry.actor_id.as_str(), entry.sequence),
                b"",
            );
        }
        batch.put_cf(&cf_references, &ref_key, bincode::serialize(&receipt)?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        // Atomic commit
        self.db.write_opt(batch, &write_opts)?;
        *next_sequence += entries.len() as u64;

        tracing::debug!(
            entity_id = %set.entity_id(),
            reference_id = %set.reference_id(),
            entries = entries.len(),
            first_sequence = receipt.first_sequence,
            "Entry-set committed"
        );

        Ok(receipt)
    }

    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        let snapshot = self.db.snapshot();
        self.query_at(&snapshot, filter)
    }

    fn balances(&self, filters: &[EntryFilter]) -> Result<Vec<i64>> {
        let snapshot = self.db.snapshot();
        filters.iter().map(|f| self.sum_at(&snapshot, f)).collect()
    }

    fn reference(&self, entity_id: &EntityId, reference_id: &ReferenceId) -> Result<Option<Receipt>> {
        let cf = self.cf(CF_REFERENCES)?;
        let key = Self::reference_key(entity_id, reference_id);
        match self.db.get_cf(&cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn stats(&self) -> Result<StorageStats> {
        let total_entries = *self.next_sequence.lock();
        let cf = self.cf(CF_REFERENCES)?;
        let mut total_entry_sets = 0u64;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            total_entry_sets += 1;
        }

        Ok(StorageStats {
            total_entries,
            total_entry_sets,
        })
    }
}

fn decode_sequence(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::StoreUnavailable(format!("Corrupt sequence key of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

/// Actor filter shorthand used by balance readers
pub(crate) fn actor_filter(actor_id: &ActorId) -> EntryFilter {
    EntryFilter::new().actor(actor_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry_set::Requirement;
    use crate::types::{Actor, Currency, MoneyState, TransitionKind};
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    fn authorize_set(order: &str, amount: i64) -> EntrySet {
        let entity = EntityId::new(order);
        EntrySet::new(
            entity.clone(),
            ReferenceId::for_transition(&entity, TransitionKind::Authorize),
            TransitionKind::Authorize,
            Currency::USD,
        )
        .leg(&Actor::system(), MoneyState::Authorized, amount, "authorized")
        .leg(&Actor::user("user_1"), MoneyState::Authorized, -amount, "earmarked")
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = RocksStore::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_ENTRIES).is_some());
        assert!(storage.db.cf_handle(CF_REFERENCES).is_some());
        assert!(storage.db.cf_handle(CF_INDICES).is_some());
    }

    #[test]
    fn test_append_and_query() {
        let (config, _temp) = test_config();
        let storage = RocksStore::open(&config).unwrap();

        let receipt = storage.append(&authorize_set("ord_1", 1000)).unwrap();
        assert_eq!(receipt.entry_ids.len(), 2);
        assert_eq!(receipt.amount, 1000);

        let entries = storage.query(&EntryFilter::new().entity("ord_1")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 0);
        assert_eq!(entries[1].sequence, 1);

        let system = storage
            .balance(&EntryFilter::new().entity("ord_1").actor(ActorId::system()))
            .unwrap();
        assert_eq!(system, 1000);
        assert_eq!(storage.balance(&EntryFilter::new().entity("ord_1")).unwrap(), 0);
    }

    #[test]
    fn test_actor_index_does_not_match_prefix_ids() {
        let (config, _temp) = test_config();
        let storage = RocksStore::open(&config).unwrap();

        storage.append(&authorize_set("ord_1", 100)).unwrap();
        storage.append(&authorize_set("ord_10", 250)).unwrap();

        let ord_1 = storage.query(&EntryFilter::new().entity("ord_1")).unwrap();
        assert!(ord_1.iter().all(|e| e.entity_id.as_str() == "ord_1"));
        assert_eq!(ord_1.len(), 2);

        let user = storage.balance(&actor_filter(&ActorId::new("user_1"))).unwrap();
        assert_eq!(user, -350);
    }

    #[test]
    fn test_replay_detection() {
        let (config, _temp) = test_config();
        let storage = RocksStore::open(&config).unwrap();

        storage.append(&authorize_set("ord_1", 1000)).unwrap();
        assert!(matches!(
            storage.append(&authorize_set("ord_1", 1000)),
            Err(Error::AlreadyProcessed { .. })
        ));
        assert!(matches!(
            storage.append(&authorize_set("ord_1", 900)),
            Err(Error::ReferenceConflict { .. })
        ));
        assert_eq!(storage.query(&EntryFilter::new()).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_requirement_writes_nothing() {
        let (config, _temp) = test_config();
        let storage = RocksStore::open(&config).unwrap();

        let set = authorize_set("ord_1", 1000).require(
            EntryFilter::new().entity("ord_1").state(MoneyState::Authorized),
            Requirement::Exactly(1),
        );
        assert!(matches!(storage.append(&set), Err(Error::InvalidTransition { .. })));
        assert!(storage.query(&EntryFilter::new()).unwrap().is_empty());
        assert!(storage
            .reference(set.entity_id(), set.reference_id())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let (config, _temp) = test_config();
        {
            let storage = RocksStore::open(&config).unwrap();
            storage.append(&authorize_set("ord_1", 1000)).unwrap();
            storage.close().unwrap();
        }

        let storage = RocksStore::open(&config).unwrap();
        let receipt = storage.append(&authorize_set("ord_2", 500)).unwrap();
        assert_eq!(receipt.first_sequence, 2);
        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_entries, 4);
        assert_eq!(stats.total_entry_sets, 2);
        assert!(storage
            .reference(&EntityId::new("ord_1"), &ReferenceId::new("ord_1:authorize"))
            .unwrap()
            .is_some());
    }
}
