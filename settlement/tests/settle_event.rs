//! Event settlement integration tests
//!
//! Drives `settle_event` over a RocksDB-backed ledger with captured orders.

use revenue_ledger::{
    Actor, ActorId, Currency, EntityId, EntryFilter, EventId, Ledger, MoneyState, Split,
};
use revenue_settlement::{
    Config, FailureKind, InMemoryOrderSource, ManifestEvent, ManifestOrder, SettlementEngine,
    SplitRule,
};
use std::sync::Arc;
use tempfile::TempDir;

const EVENT: &str = "evt_concert";

fn fixed_rule() -> SplitRule {
    SplitRule::Fixed {
        splits: vec![
            Split::new(Actor::club("club_1"), 700, "venue share"),
            Split::new(Actor::promoter("promo_1"), 100, "promoter share"),
            Split::new(Actor::platform("platform"), 200, "platform fee"),
        ],
    }
}

fn manifest_order(index: usize, total: i64) -> ManifestOrder {
    ManifestOrder {
        id: EntityId::new(format!("ord_{:02}", index)),
        user_id: ActorId::new(format!("user_{:02}", index)),
        total_amount: total,
        currency: Currency::USD,
        payment_intent_ref: Some(format!("pi_{:02}", index)),
        payment_ref: Some(format!("ch_{:02}", index)),
    }
}

/// Ledger with every order authorized and captured, plus the matching source
async fn setup(totals: &[i64], max_concurrent: usize) -> (SettlementEngine, InMemoryOrderSource, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.ledger.data_dir = temp_dir.path().join("ledger");
    config.ledger.rocksdb.sync_writes = false;
    config.orchestrator.max_concurrent_orders = max_concurrent;

    let ledger = Arc::new(Ledger::open(config.ledger.clone()).await.unwrap());
    let event_id = EventId::new(EVENT);

    let orders: Vec<ManifestOrder> = totals
        .iter()
        .enumerate()
        .map(|(i, total)| manifest_order(i, *total))
        .collect();

    for manifest in &orders {
        let order = manifest.to_order(&event_id);
        ledger
            .record_order_authorized(&order, manifest.payment_intent_ref.as_deref().unwrap())
            .await
            .unwrap();
        ledger
            .record_order_captured(&order, manifest.payment_ref.as_deref().unwrap())
            .await
            .unwrap();
    }

    let source = InMemoryOrderSource::new();
    source
        .insert_event(ManifestEvent {
            event_id,
            completed: true,
            split_rule: fixed_rule(),
            orders,
        })
        .await;

    let engine = SettlementEngine::new(ledger, Arc::new(source.clone()), &config).unwrap();
    (engine, source, temp_dir)
}

fn payable(ledger: &Ledger, actor: &str) -> i64 {
    ledger
        .get_balance(&EntryFilter::new().actor(actor).state(MoneyState::Payable))
        .unwrap()
}

#[tokio::test]
async fn test_failing_order_is_isolated() {
    // Order 3 totals 900, so the 1000-unit fixed rule cannot match its settled balance
    let mut totals = vec![1000; 8];
    totals[3] = 900;
    let (engine, _source, _dir) = setup(&totals, 3).await;

    let report = engine.settle_event(&EventId::new(EVENT)).await.unwrap();

    assert_eq!(report.total_orders, 8);
    assert_eq!(report.processed_count, 7);
    assert_eq!(report.already_processed_count, 0);
    assert_eq!(report.failed_count(), 1);

    let failure = &report.failures[0];
    assert_eq!(failure.order_id, EntityId::new("ord_03"));
    assert_eq!(failure.kind, FailureKind::SplitMismatch);

    let ledger = engine.ledger();
    assert_eq!(payable(ledger, "club_1"), 7 * 700);
    assert_eq!(payable(ledger, "promo_1"), 7 * 100);
    assert_eq!(payable(ledger, "platform"), 7 * 200);

    // The failed order stays SETTLED with nothing allocated
    let failed = EntityId::new("ord_03");
    assert_eq!(ledger.money_state(&failed).unwrap(), Some(MoneyState::Settled));
    assert_eq!(
        ledger
            .get_balance(&EntryFilter::new().entity(&failed).state(MoneyState::Settled))
            .unwrap(),
        900
    );

    assert!(ledger.verify_invariants().unwrap().is_balanced());
    assert_eq!(engine.metrics().orders_processed.get(), 7);
}

#[tokio::test]
async fn test_rerun_is_a_no_op() {
    let (engine, source, _dir) = setup(&[1000, 1000, 1000], 2).await;
    let event_id = EventId::new(EVENT);

    let first = engine.settle_event(&event_id).await.unwrap();
    assert_eq!(first.processed_count, 3);
    let entries = engine.ledger().entries(&EntryFilter::new()).unwrap().len();

    // The source now hides settled orders
    let second = engine.settle_event(&event_id).await.unwrap();
    assert_eq!(second.total_orders, 0);

    // A source that forgot what was settled resubmits the same orders
    let fresh = InMemoryOrderSource::new();
    for event in source.events().await {
        fresh.insert_event(event).await;
    }
    let replay_engine =
        SettlementEngine::new(engine.ledger().clone(), Arc::new(fresh), &Config::default()).unwrap();

    let third = replay_engine.settle_event(&event_id).await.unwrap();
    assert_eq!(third.total_orders, 3);
    assert_eq!(third.processed_count, 0);
    assert_eq!(third.already_processed_count, 3);
    assert!(third.is_complete());

    assert_eq!(engine.ledger().entries(&EntryFilter::new()).unwrap().len(), entries);
    assert_eq!(payable(engine.ledger(), "club_1"), 2100);
}

#[tokio::test]
async fn test_partial_prior_run_is_completed() {
    let (engine, _source, _dir) = setup(&[1000, 1000], 4).await;
    let event_id = EventId::new(EVENT);

    // A previous run got as far as holding ord_00
    let order = manifest_order(0, 1000).to_order(&event_id);
    engine.ledger().hold_order_revenue(&order).await.unwrap();

    let report = engine.settle_event(&event_id).await.unwrap();
    assert_eq!(report.processed_count, 2);
    assert!(report.is_complete());
    assert_eq!(engine.ledger().money_state(&order.id).unwrap(), Some(MoneyState::Payable));
}

#[tokio::test]
async fn test_payout_after_settlement() {
    let (engine, _source, _dir) = setup(&[1000, 1000], 2).await;
    engine.settle_event(&EventId::new(EVENT)).await.unwrap();

    let ledger = engine.ledger();
    let club = Actor::club("club_1");
    let outcome = ledger
        .record_payout(&club, 1400, Currency::USD, &revenue_ledger::ReferenceId::new("po_club_1"))
        .await
        .unwrap();
    assert!(outcome.is_applied());
    assert_eq!(payable(ledger, "club_1"), 0);
    assert_eq!(
        ledger
            .get_balance(&EntryFilter::new().actor("club_1").state(MoneyState::Paid))
            .unwrap(),
        1400
    );
    assert!(ledger.verify_invariants().unwrap().is_balanced());
}
