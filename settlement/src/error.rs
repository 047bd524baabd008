//! Error types for the settlement orchestrator

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] revenue_ledger::Error),

    /// Order collaborator failed or returned bad data
    #[error("Order source error: {0}")]
    OrderSource(String),

    /// Split rule cannot produce splits
    #[error("Split rule error: {0}")]
    SplitRule(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Per-order task failed to report
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
