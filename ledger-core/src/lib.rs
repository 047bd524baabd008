//! Revenue Ledger
//!
//! Immutable double-entry ledger for ticketing revenue.
//!
//! # Architecture
//!
//! - **Entry-sets**: every transition writes a balanced group of entries, atomically
//! - **Single Writer**: one logical writer task serializes idempotency and balance checks
//! - **Derived balances**: there is no balance table; balances are sums over entries
//! - **Pluggable store**: RocksDB in production, in-memory for tests
//!
//! # Invariants
//!
//! - Every entity's entries sum to zero
//! - Append-only: entries are never modified or deleted
//! - At most one committed entry-set per `(entity, reference)`
//! - Split allocations sum exactly to the settled balance

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod allocator;
pub mod config;
pub mod crypto;
pub mod entry_set;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod storage;
pub mod transitions;
pub mod types;

// Re-exports
pub use config::Config;
pub use entry_set::{EntrySet, Receipt, Requirement};
pub use error::{Error, Result};
pub use ledger::{InvariantReport, Ledger, Statement};
pub use memory::MemoryStore;
pub use storage::{LedgerStore, RocksStore};
pub use transitions::TransitionOutcome;
pub use types::{
    Actor, ActorId, ActorType, Currency, EntityId, EntryFilter, EventId, LedgerEntry, MoneyState,
    Order, ReferenceId, Split, TransitionKind,
};
