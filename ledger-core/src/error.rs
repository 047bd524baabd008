//! Error types for the ledger

use crate::types::{EntityId, ReferenceId, TransitionKind};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Prerequisite balance missing or wrong, or illegal state edge
    #[error("Invalid {transition} transition for {entity_id}: {reason}")]
    InvalidTransition {
        /// Entity the transition targeted
        entity_id: EntityId,
        /// Attempted transition
        transition: TransitionKind,
        /// What did not hold
        reason: String,
    },

    /// Reference already committed with identical content
    #[error("Already processed: {entity_id} / {reference_id}")]
    AlreadyProcessed {
        /// Entity
        entity_id: EntityId,
        /// Idempotency key
        reference_id: ReferenceId,
    },

    /// Reference already committed with different content
    #[error("Reference conflict: {entity_id} / {reference_id} was committed with different entries")]
    ReferenceConflict {
        /// Entity
        entity_id: EntityId,
        /// Idempotency key
        reference_id: ReferenceId,
    },

    /// Split amounts do not sum to the settled balance
    #[error("Split mismatch for {entity_id}: settled balance is {expected}, splits sum to {actual}")]
    SplitMismatch {
        /// Entity
        entity_id: EntityId,
        /// Settled balance
        expected: i64,
        /// Sum of the splits
        actual: i128,
    },

    /// Entry-set amounts do not sum to zero
    #[error("Unbalanced entry-set {reference_id}: amounts sum to {imbalance}")]
    Unbalanced {
        /// Idempotency key
        reference_id: ReferenceId,
        /// Non-zero sum
        imbalance: i128,
    },

    /// Malformed entry-set or input
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Transient persistence failure
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (writer mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Safe to retry the same call with the same idempotency key
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Concurrency(_))
    }

    /// Replay of a committed transition
    pub fn is_already_processed(&self) -> bool {
        matches!(self, Error::AlreadyProcessed { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}
