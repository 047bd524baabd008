//! Metrics for the settlement orchestrator
//!
//! - `settlement_orders_processed_total` - Orders settled by a run
//! - `settlement_orders_already_processed_total` - Orders found settled already
//! - `settlement_orders_failed_total{kind}` - Orders that failed
//! - `settlement_event_duration_seconds` - Histogram of `settle_event` latencies

use crate::types::{FailureKind, SettlementReport};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct SettlementMetrics {
    /// Orders settled by a run
    pub orders_processed: IntCounter,

    /// Orders found settled already
    pub orders_already_processed: IntCounter,

    /// Failed orders by kind
    pub orders_failed: IntCounterVec,

    /// Event settlement duration
    pub event_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl SettlementMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let orders_processed = IntCounter::new(
            "settlement_orders_processed_total",
            "Orders settled by a run",
        )?;
        registry.register(Box::new(orders_processed.clone()))?;

        let orders_already_processed = IntCounter::new(
            "settlement_orders_already_processed_total",
            "Orders found settled by an earlier run",
        )?;
        registry.register(Box::new(orders_already_processed.clone()))?;

        let orders_failed = IntCounterVec::new(
            Opts::new("settlement_orders_failed_total", "Orders that failed to settle"),
            &["kind"],
        )?;
        registry.register(Box::new(orders_failed.clone()))?;

        let event_duration = Histogram::with_opts(
            HistogramOpts::new(
                "settlement_event_duration_seconds",
                "Histogram of settle_event latencies",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        )?;
        registry.register(Box::new(event_duration.clone()))?;

        Ok(Self {
            orders_processed,
            orders_already_processed,
            orders_failed,
            event_duration,
            registry,
        })
    }

    /// Record a finished run
    pub fn record_report(&self, report: &SettlementReport) {
        self.orders_processed.inc_by(report.processed_count as u64);
        self.orders_already_processed
            .inc_by(report.already_processed_count as u64);
        for failure in &report.failures {
            self.record_failure(failure.kind);
        }

        let elapsed = (report.finished_at - report.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.event_duration.observe(elapsed);
    }

    fn record_failure(&self, kind: FailureKind) {
        self.orders_failed.with_label_values(&[kind.as_str()]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderFailure, OrderOutcome};
    use chrono::Utc;
    use revenue_ledger::{EntityId, EventId};

    #[test]
    fn test_record_report() {
        let metrics = SettlementMetrics::new().unwrap();
        let mut report = SettlementReport::new(EventId::new("evt_1"), 3, Utc::now());
        report.record(OrderOutcome::Processed);
        report.record(OrderOutcome::Processed);
        report.record(OrderOutcome::Failed(OrderFailure {
            order_id: EntityId::new("ord_3"),
            kind: FailureKind::InvalidTransition,
            reason: "not held".to_string(),
        }));
        report.finished_at = Utc::now();

        metrics.record_report(&report);
        assert_eq!(metrics.orders_processed.get(), 2);
        assert_eq!(
            metrics
                .orders_failed
                .with_label_values(&["invalid_transition"])
                .get(),
            1
        );
        assert_eq!(metrics.event_duration.get_sample_count(), 1);
    }
}
