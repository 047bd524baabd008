//! Revenue Settlement
//!
//! Settles the revenue of completed ticketed events on top of the revenue ledger.
//!
//! # Architecture
//!
//! For every completed, unsettled order of an event:
//!
//! 1. **Hold**: CAPTURED → HELD
//! 2. **Settle**: HELD → SETTLED
//! 3. **Split**: the event's [`SplitRule`] divides the order total across payees
//! 4. **Allocate**: SETTLED → PAYABLE, atomically and summing exactly
//!
//! Orders run concurrently up to `orchestrator.max_concurrent_orders`. One order's
//! failure never stops the others, and every step is idempotent, so a rerun only
//! picks up what is left.
//!
//! # Example
//!
//! ```no_run
//! use revenue_settlement::{Config, InMemoryOrderSource, SettlementEngine};
//! use revenue_ledger::EventId;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> revenue_settlement::Result<()> {
//!     let source = InMemoryOrderSource::from_manifest("orders.json")?;
//!     let engine = SettlementEngine::open(Config::default(), Arc::new(source)).await?;
//!
//!     let report = engine.settle_event(&EventId::new("evt_1")).await?;
//!     println!("settled {} of {} orders", report.processed_count, report.total_orders);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod source;
pub mod split;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use source::{InMemoryOrderSource, Manifest, ManifestEvent, ManifestOrder, OrderSource};
pub use split::{Share, SplitRule};
pub use types::{FailureKind, OrderFailure, OrderOutcome, SettlementReport};
