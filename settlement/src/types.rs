//! Core types for the settlement orchestrator

use chrono::{DateTime, Utc};
use revenue_ledger::{EntityId, EventId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an order failed to settle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Prerequisite balance missing or wrong
    InvalidTransition,
    /// Splits did not match the settled balance
    SplitMismatch,
    /// Reference reused with different content
    ReferenceConflict,
    /// Transient persistence failure; rerun to retry
    StoreUnavailable,
    /// Split rule could not produce splits
    SplitRule,
    /// Anything else
    Other,
}

impl FailureKind {
    /// Classify an orchestrator error
    pub fn of(error: &crate::Error) -> Self {
        use revenue_ledger::Error as LedgerError;
        match error {
            crate::Error::Ledger(LedgerError::InvalidTransition { .. }) => FailureKind::InvalidTransition,
            crate::Error::Ledger(LedgerError::SplitMismatch { .. }) => FailureKind::SplitMismatch,
            crate::Error::Ledger(LedgerError::ReferenceConflict { .. }) => FailureKind::ReferenceConflict,
            crate::Error::Ledger(e) if e.is_retryable() => FailureKind::StoreUnavailable,
            crate::Error::SplitRule(_) => FailureKind::SplitRule,
            _ => FailureKind::Other,
        }
    }

    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidTransition => "invalid_transition",
            FailureKind::SplitMismatch => "split_mismatch",
            FailureKind::ReferenceConflict => "reference_conflict",
            FailureKind::StoreUnavailable => "store_unavailable",
            FailureKind::SplitRule => "split_rule",
            FailureKind::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One order that failed to settle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFailure {
    /// Order
    pub order_id: EntityId,
    /// Failure class
    pub kind: FailureKind,
    /// Error message
    pub reason: String,
}

/// Result of settling one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    /// At least one transition was applied
    Processed,
    /// Every transition had been applied by an earlier run
    AlreadyProcessed,
    /// Settlement stopped at an error
    Failed(OrderFailure),
}

/// Aggregate result of `settle_event`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    /// Event
    pub event_id: EventId,
    /// Orders the collaborator returned
    pub total_orders: usize,
    /// Orders settled by this run
    pub processed_count: usize,
    /// Orders settled by an earlier run
    pub already_processed_count: usize,
    /// Orders that failed
    pub failures: Vec<OrderFailure>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl SettlementReport {
    /// Start an empty report
    pub fn new(event_id: EventId, total_orders: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            event_id,
            total_orders,
            processed_count: 0,
            already_processed_count: 0,
            failures: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    /// Fold one order outcome into the counters
    pub fn record(&mut self, outcome: OrderOutcome) {
        match outcome {
            OrderOutcome::Processed => self.processed_count += 1,
            OrderOutcome::AlreadyProcessed => self.already_processed_count += 1,
            OrderOutcome::Failed(failure) => self.failures.push(failure),
        }
    }

    /// Orders that failed
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// Every order is settled, now or earlier
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counters() {
        let mut report = SettlementReport::new(EventId::new("evt_1"), 3, Utc::now());
        report.record(OrderOutcome::Processed);
        report.record(OrderOutcome::AlreadyProcessed);
        report.record(OrderOutcome::Failed(OrderFailure {
            order_id: EntityId::new("ord_3"),
            kind: FailureKind::SplitMismatch,
            reason: "mismatch".to_string(),
        }));

        assert_eq!(report.processed_count, 1);
        assert_eq!(report.already_processed_count, 1);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_failure_classification() {
        let err = crate::Error::Ledger(revenue_ledger::Error::SplitMismatch {
            entity_id: EntityId::new("ord_1"),
            expected: 1000,
            actual: 950,
        });
        assert_eq!(FailureKind::of(&err), FailureKind::SplitMismatch);

        let err = crate::Error::Ledger(revenue_ledger::Error::StoreUnavailable("down".to_string()));
        assert_eq!(FailureKind::of(&err), FailureKind::StoreUnavailable);
        assert_eq!(FailureKind::of(&crate::Error::SplitRule("x".to_string())), FailureKind::SplitRule);
    }
}
