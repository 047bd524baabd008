//! Metrics collection for observability
//!
//! Prometheus metrics for the ledger writer. Each [`LedgerMetrics`] owns its
//! registry so several ledgers can live in one process.
//!
//! # Metrics
//!
//! - `ledger_entry_sets_committed_total` - Entry-sets written
//! - `ledger_entries_written_total` - Individual entries written
//! - `ledger_replays_total` - Appends answered with AlreadyProcessed
//! - `ledger_rejections_total{reason}` - Appends rejected
//! - `ledger_append_duration_seconds` - Histogram of append latencies

use crate::Error;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct LedgerMetrics {
    /// Entry-sets committed
    pub entry_sets_committed: IntCounter,

    /// Entries written
    pub entries_written: IntCounter,

    /// Replayed references
    pub replays: IntCounter,

    /// Rejected appends by reason
    pub rejections: IntCounterVec,

    /// Append duration histogram
    pub append_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl LedgerMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entry_sets_committed = IntCounter::new(
            "ledger_entry_sets_committed_total",
            "Total number of entry-sets committed",
        )?;
        registry.register(Box::new(entry_sets_committed.clone()))?;

        let entries_written = IntCounter::new(
            "ledger_entries_written_total",
            "Total number of ledger entries written",
        )?;
        registry.register(Box::new(entries_written.clone()))?;

        let replays = IntCounter::new(
            "ledger_replays_total",
            "Appends answered as already processed",
        )?;
        registry.register(Box::new(replays.clone()))?;

        let rejections = IntCounterVec::new(
            Opts::new("ledger_rejections_total", "Appends rejected, by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        Ok(Self {
            entry_sets_committed,
            entries_written,
            replays,
            rejections,
            append_duration,
            registry,
        })
    }

    /// Record a committed entry-set
    pub fn record_commit(&self, entries: usize) {
        self.entry_sets_committed.inc();
        self.entries_written.inc_by(entries as u64);
    }

    /// Record a failed append
    pub fn record_error(&self, error: &Error) {
        if error.is_already_processed() {
            self.replays.inc();
            return;
        }
        let reason = match error {
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::ReferenceConflict { .. } => "reference_conflict",
            Error::SplitMismatch { .. } => "split_mismatch",
            Error::Unbalanced { .. } => "unbalanced",
            Error::InvalidEntry(_) => "invalid_entry",
            Error::StoreUnavailable(_) | Error::Io(_) => "store_unavailable",
            _ => "other",
        };
        self.rejections.with_label_values(&[reason]).inc();
    }

    /// Record append duration
    pub fn record_append_duration(&self, duration_seconds: f64) {
        self.append_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode metrics in Prometheus text format
    pub fn export(&self) -> prometheus::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, ReferenceId};

    #[test]
    fn test_metrics_creation() {
        let metrics = LedgerMetrics::new().unwrap();
        metrics.record_commit(3);
        metrics.record_append_duration(0.002);

        assert_eq!(metrics.entry_sets_committed.get(), 1);
        assert_eq!(metrics.entries_written.get(), 3);
    }

    #[test]
    fn test_independent_registries() {
        let a = LedgerMetrics::new().unwrap();
        let b = LedgerMetrics::new().unwrap();
        a.record_commit(2);
        assert_eq!(b.entry_sets_committed.get(), 0);
    }

    #[test]
    fn test_error_classification() {
        let metrics = LedgerMetrics::new().unwrap();
        metrics.record_error(&Error::AlreadyProcessed {
            entity_id: EntityId::new("ord_1"),
            reference_id: ReferenceId::new("ord_1:capture"),
        });
        metrics.record_error(&Error::StoreUnavailable("down".to_string()));

        assert_eq!(metrics.replays.get(), 1);
        assert_eq!(
            metrics.rejections.with_label_values(&["store_unavailable"]).get(),
            1
        );
        assert!(metrics.export().unwrap().contains("ledger_replays_total 1"));
    }
}
