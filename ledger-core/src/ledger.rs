//! Main ledger orchestration layer
//!
//! This module ties together storage, the single writer and metrics into the
//! [`Ledger`] facade. Writes go through the actor; balance reads go to the store.
//!
//! # Example
//!
//! ```no_run
//! use revenue_ledger::{Config, EntryFilter, Ledger, MoneyState};
//!
//! #[tokio::main]
//! async fn main() -> revenue_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let settled = ledger.get_balance(&EntryFilter::new().entity("ord_1").state(MoneyState::Settled))?;
//!     println!("settled: {}", settled);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    entry_set::{EntrySet, Receipt},
    memory::MemoryStore,
    metrics::LedgerMetrics,
    storage::{actor_filter, LedgerStore, RocksStore, StorageStats},
    types::{Actor, ActorId, ActorType, Currency, EntityId, EntryFilter, LedgerEntry, MoneyState, ReferenceId},
    Config, Error, Result,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    store: Arc<dyn LedgerStore>,

    /// Writer metrics
    metrics: LedgerMetrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("service", &self.config.service_name)
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

/// Entity whose entries do not sum to zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnbalancedEntity {
    /// Entity
    pub entity_id: EntityId,
    /// Non-zero sum
    pub imbalance: i128,
}

/// Result of an invariant check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvariantReport {
    /// Entities examined
    pub entities_checked: usize,
    /// Entries examined
    pub entries_checked: usize,
    /// Entities violating the zero-sum invariant
    pub unbalanced: Vec<UnbalancedEntity>,
}

impl InvariantReport {
    /// No violations found
    pub fn is_balanced(&self) -> bool {
        self.unbalanced.is_empty()
    }

    fn from_entries(entries: &[LedgerEntry]) -> Self {
        let mut sums: BTreeMap<&EntityId, i128> = BTreeMap::new();
        for entry in entries {
            *sums.entry(&entry.entity_id).or_default() += i128::from(entry.amount);
        }

        Self {
            entities_checked: sums.len(),
            entries_checked: entries.len(),
            unbalanced: sums
                .into_iter()
                .filter(|(_, sum)| *sum != 0)
                .map(|(entity_id, imbalance)| UnbalancedEntity {
                    entity_id: entity_id.clone(),
                    imbalance,
                })
                .collect(),
        }
    }
}

/// Actor balances per currency and money state
pub type Statement = BTreeMap<(Currency, MoneyState), i64>;

impl Ledger {
    /// Open ledger backed by RocksDB
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(RocksStore::open(&config)?);
        Self::with_store(store, config)
    }

    /// Open ledger over an injected store
    ///
    /// Spawns the writer task, so it must be called inside a Tokio runtime.
    pub fn with_store(store: Arc<dyn LedgerStore>, config: Config) -> Result<Self> {
        config.validate()?;
        let metrics = LedgerMetrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        let handle = spawn_ledger_actor(store.clone(), metrics.clone(), config.writer.mailbox_capacity);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            mailbox_capacity = config.writer.mailbox_capacity,
            "Ledger started"
        );

        Ok(Self {
            handle,
            store,
            metrics,
            config,
        })
    }

    /// Open ledger over a fresh in-memory store
    pub fn in_memory() -> Result<Self> {
        Self::with_store(Arc::new(MemoryStore::new()), Config::default())
    }

    /// Append an entry-set through the single writer
    pub async fn post(&self, set: EntrySet) -> Result<Receipt> {
        self.handle.append(set).await
    }

    /// Sum of amounts over entries matching the filter
    pub fn get_balance(&self, filter: &EntryFilter) -> Result<i64> {
        self.store.balance(filter)
    }

    /// Sums for several filters over one consistent snapshot
    pub fn get_balances(&self, filters: &[EntryFilter]) -> Result<Vec<i64>> {
        self.store.balances(filters)
    }

    /// Audit trail in append order
    pub fn entries(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>> {
        self.store.query(filter)
    }

    /// Receipt of a committed reference
    pub fn receipt(&self, entity_id: &EntityId, reference_id: &ReferenceId) -> Result<Option<Receipt>> {
        self.store.reference(entity_id, reference_id)
    }

    /// Non-zero balances of an actor per currency and state
    pub fn statement(&self, actor_id: &ActorId) -> Result<Statement> {
        let entries = self.store.query(&actor_filter(actor_id))?;
        let mut totals: BTreeMap<(Currency, MoneyState), i128> = BTreeMap::new();
        for entry in &entries {
            *totals.entry((entry.currency, entry.state)).or_default() += i128::from(entry.amount);
        }

        totals
            .into_iter()
            .filter(|(_, sum)| *sum != 0)
            .map(|(key, sum)| {
                i64::try_from(sum)
                    .map(|balance| (key, balance))
                    .map_err(|_| Error::InvalidEntry(format!("balance {} overflows i64", sum)))
            })
            .collect()
    }

    /// Current state of an entity's money
    ///
    /// The latest lifecycle state in which some actor holds a positive balance, or
    /// `None` if the entity has no entries. Payouts live under their own entities, so an
    /// allocated order reports `PAYABLE` after its payees are paid.
    pub fn money_state(&self, entity_id: &EntityId) -> Result<Option<MoneyState>> {
        Ok(holdings(&self.store.query(&EntryFilter::new().entity(entity_id))?)?
            .into_iter()
            .map(|holding| holding.state)
            .max())
    }

    /// Check the zero-sum invariant for one entity
    pub fn verify_entity(&self, entity_id: &EntityId) -> Result<InvariantReport> {
        let entries = self.store.query(&EntryFilter::new().entity(entity_id))?;
        Ok(InvariantReport::from_entries(&entries))
    }

    /// Check the zero-sum invariant for every entity in the log
    pub fn verify_invariants(&self) -> Result<InvariantReport> {
        let entries = self.store.query(&EntryFilter::new())?;
        let report = InvariantReport::from_entries(&entries);

        if !report.is_balanced() {
            for violation in &report.unbalanced {
                tracing::error!(
                    entity_id = %violation.entity_id,
                    imbalance = %violation.imbalance,
                    "Entity violates zero-sum invariant"
                );
            }
        }

        Ok(report)
    }

    /// Storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.store.stats()
    }

    /// Writer metrics
    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown the writer
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

/// Positive balance of one actor in one state
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Holding {
    pub actor: Actor,
    pub state: MoneyState,
    pub amount: i64,
}

/// Positive `(actor, state)` balances of one entity's entries
///
/// Actors are keyed by id and type, so a user who is also a payee keeps separate
/// holdings per role.
pub(crate) fn holdings(entries: &[LedgerEntry]) -> Result<Vec<Holding>> {
    let mut sums: BTreeMap<(ActorId, ActorType, MoneyState), i128> = BTreeMap::new();
    for entry in entries {
        *sums
            .entry((entry.actor_id.clone(), entry.actor_type, entry.state))
            .or_default() += i128::from(entry.amount);
    }

    sums.into_iter()
        .filter(|(_, sum)| *sum > 0)
        .map(|((id, actor_type, state), sum)| {
            let amount = i64::try_from(sum)
                .map_err(|_| Error::InvalidEntry(format!("balance {} overflows i64", sum)))?;
            Ok(Holding {
                actor: Actor { id, actor_type },
                state,
                amount,
            })
        })
        .collect()
}
