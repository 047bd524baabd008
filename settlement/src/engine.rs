//! Main settlement engine
//!
//! Settles every completed order of an event: hold, settle, then allocate by the
//! event's split rule. Orders run concurrently up to a configured bound, and each
//! order's failure is recorded without touching the others.

use crate::{
    config::{Config, OrchestratorConfig},
    metrics::SettlementMetrics,
    source::OrderSource,
    split::SplitRule,
    types::{FailureKind, OrderFailure, OrderOutcome, SettlementReport},
    Error, Result,
};
use chrono::Utc;
use revenue_ledger::{EntityId, EventId, Ledger, Order};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Settlement engine
pub struct SettlementEngine {
    /// Ledger
    ledger: Arc<Ledger>,

    /// Order collaborator
    source: Arc<dyn OrderSource>,

    /// Orchestrator metrics
    metrics: SettlementMetrics,

    /// Configuration
    config: OrchestratorConfig,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("ledger", &self.ledger)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SettlementEngine {
    /// Create engine over an open ledger
    pub fn new(ledger: Arc<Ledger>, source: Arc<dyn OrderSource>, config: &Config) -> Result<Self> {
        config.validate()?;
        let metrics = SettlementMetrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        Ok(Self {
            ledger,
            source,
            metrics,
            config: config.orchestrator.clone(),
        })
    }

    /// Open the RocksDB ledger named by the configuration and build the engine
    pub async fn open(config: Config, source: Arc<dyn OrderSource>) -> Result<Self> {
        let ledger = Arc::new(Ledger::open(config.ledger.clone()).await?);
        Self::new(ledger, source, &config)
    }

    /// Ledger handle
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Orchestrator metrics
    pub fn metrics(&self) -> &SettlementMetrics {
        &self.metrics
    }

    /// Settle every completed, unsettled order of an event
    ///
    /// Fails only if the collaborator cannot list orders or produce the split rule.
    /// Per-order failures are reported in [`SettlementReport::failures`]. Rerunning is
    /// a no-op for orders already settled.
    #[tracing::instrument(skip(self, event_id), fields(event_id = %event_id))]
    pub async fn settle_event(&self, event_id: &EventId) -> Result<SettlementReport> {
        let started_at = Utc::now();

        let orders = self.source.list_settlable_orders(event_id).await?;
        let rule = self.source.split_rule(event_id).await?;

        tracing::info!(orders = orders.len(), "Starting event settlement");

        let mut report = SettlementReport::new(event_id.clone(), orders.len(), started_at);
        let mut pending: HashSet<EntityId> = orders.iter().map(|o| o.id.clone()).collect();
        let mut settled_ids = Vec::new();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_orders.max(1)));
        let mut join_set = JoinSet::new();

        for order in orders {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Concurrency(format!("Semaphore closed: {}", e)))?;
            let ledger = self.ledger.clone();
            let rule = rule.clone();

            join_set.spawn(async move {
                let _permit = permit;
                let outcome = settle_order(&ledger, &order, &rule).await;
                (order.id, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((order_id, outcome)) => {
                    pending.remove(&order_id);
                    if !matches!(outcome, OrderOutcome::Failed(_)) {
                        settled_ids.push(order_id);
                    }
                    report.record(outcome);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Order settlement task failed");
                }
            }
        }

        // Orders whose task died without reporting
        let mut lost: Vec<EntityId> = pending.into_iter().collect();
        lost.sort();
        for order_id in lost {
            report.record(OrderOutcome::Failed(OrderFailure {
                order_id,
                kind: FailureKind::Other,
                reason: "settlement task did not complete".to_string(),
            }));
        }

        report.failures.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        report.finished_at = Utc::now();
        self.metrics.record_report(&report);

        if !settled_ids.is_empty() {
            if let Err(e) = self.source.mark_settled(event_id, &settled_ids).await {
                tracing::warn!(error = %e, "Failed to report settled orders to order source");
            }
        }

        tracing::info!(
            total = report.total_orders,
            processed = report.processed_count,
            already_processed = report.already_processed_count,
            failed = report.failed_count(),
            "Event settlement finished"
        );

        Ok(report)
    }
}

/// Run one order through hold, settle and allocate
async fn settle_order(ledger: &Ledger, order: &Order, rule: &SplitRule) -> OrderOutcome {
    match run_order(ledger, order, rule).await {
        Ok(true) => OrderOutcome::Processed,
        Ok(false) => {
            tracing::debug!(order_id = %order.id, "Order already settled");
            OrderOutcome::AlreadyProcessed
        }
        Err(e) => {
            let kind = FailureKind::of(&e);
            match &e {
                Error::Ledger(revenue_ledger::Error::SplitMismatch { expected, actual, .. }) => {
                    tracing::error!(
                        order_id = %order.id,
                        expected = *expected,
                        actual = %actual,
                        "Order settlement failed: split mismatch"
                    );
                }
                _ => {
                    tracing::error!(
                        order_id = %order.id,
                        kind = %kind,
                        expected = order.total_amount,
                        error = %e,
                        "Order settlement failed"
                    );
                }
            }
            OrderOutcome::Failed(OrderFailure {
                order_id: order.id.clone(),
                kind,
                reason: e.to_string(),
            })
        }
    }
}

/// Returns whether any transition was applied by this call
async fn run_order(ledger: &Ledger, order: &Order, rule: &SplitRule) -> Result<bool> {
    let held = ledger.hold_order_revenue(order).await?;
    let settled = ledger.settle_order_revenue(order).await?;
    let splits = rule.splits_for(order.total_amount)?;
    let allocated = ledger.allocate_to_payable(order, &splits).await?;

    Ok(held.is_applied() || settled.is_applied() || allocated.is_applied())
}
