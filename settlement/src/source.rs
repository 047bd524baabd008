//! Order collaborator
//!
//! The orchestrator never reads the order/event store directly; it goes through
//! [`OrderSource`]. [`InMemoryOrderSource`] is the bundled implementation, loadable
//! from a JSON manifest.

use crate::{split::SplitRule, Error, Result};
use async_trait::async_trait;
use revenue_ledger::{ActorId, Currency, EntityId, EventId, Order};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Source of settlable orders and split rules
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Completed, unsettled orders of an event
    async fn list_settlable_orders(&self, event_id: &EventId) -> Result<Vec<Order>>;

    /// Distribution rule of an event
    async fn split_rule(&self, event_id: &EventId) -> Result<SplitRule>;

    /// Told which orders a settlement run finished
    async fn mark_settled(&self, _event_id: &EventId, _order_ids: &[EntityId]) -> Result<()> {
        Ok(())
    }
}

/// Order as listed in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestOrder {
    /// Order id
    pub id: EntityId,
    /// Paying user
    pub user_id: ActorId,
    /// Total in minor units
    pub total_amount: i64,
    /// Currency
    pub currency: Currency,
    /// Processor authorization reference
    #[serde(default)]
    pub payment_intent_ref: Option<String>,
    /// Processor capture reference
    #[serde(default)]
    pub payment_ref: Option<String>,
}

impl ManifestOrder {
    /// Order under its event
    pub fn to_order(&self, event_id: &EventId) -> Order {
        Order {
            id: self.id.clone(),
            event_id: event_id.clone(),
            user_id: self.user_id.clone(),
            total_amount: self.total_amount,
            currency: self.currency,
        }
    }
}

/// Event as listed in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEvent {
    /// Event id
    pub event_id: EventId,
    /// Event has taken place and may be settled
    #[serde(default)]
    pub completed: bool,
    /// Distribution rule
    pub split_rule: SplitRule,
    /// Orders
    #[serde(default)]
    pub orders: Vec<ManifestOrder>,
}

/// Manifest file layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Events
    pub events: Vec<ManifestEvent>,
}

/// Order source held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderSource {
    events: Arc<RwLock<HashMap<EventId, ManifestEvent>>>,
    settled: Arc<RwLock<HashSet<EntityId>>>,
}

impl InMemoryOrderSource {
    /// Create empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a parsed manifest
    pub fn from_parts(manifest: Manifest) -> Self {
        let events = manifest
            .events
            .into_iter()
            .map(|event| (event.event_id.clone(), event))
            .collect();

        Self {
            events: Arc::new(RwLock::new(events)),
            settled: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Load a JSON manifest file
    pub fn from_manifest(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&content)?;

        for event in &manifest.events {
            event.split_rule.validate().map_err(|e| {
                Error::OrderSource(format!("event {} in {}: {}", event.event_id, path.display(), e))
            })?;
        }

        tracing::info!(
            path = %path.display(),
            events = manifest.events.len(),
            "Loaded order manifest"
        );

        Ok(Self::from_parts(manifest))
    }

    /// Add or replace an event
    pub async fn insert_event(&self, event: ManifestEvent) {
        self.events.write().await.insert(event.event_id.clone(), event);
    }

    /// Flag an event as completed
    pub async fn complete_event(&self, event_id: &EventId) -> Result<()> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(event_id)
            .ok_or_else(|| Error::OrderSource(format!("unknown event {}", event_id)))?;
        event.completed = true;
        Ok(())
    }

    /// Every event with its orders
    pub async fn events(&self) -> Vec<ManifestEvent> {
        let mut events: Vec<ManifestEvent> = self.events.read().await.values().cloned().collect();
        events.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        events
    }

    /// Orders already reported settled
    pub async fn is_settled(&self, order_id: &EntityId) -> bool {
        self.settled.read().await.contains(order_id)
    }
}

#[async_trait]
impl OrderSource for InMemoryOrderSource {
    async fn list_settlable_orders(&self, event_id: &EventId) -> Result<Vec<Order>> {
        let events = self.events.read().await;
        let event = events
            .get(event_id)
            .ok_or_else(|| Error::OrderSource(format!("unknown event {}", event_id)))?;

        if !event.completed {
            return Err(Error::OrderSource(format!("event {} is not completed", event_id)));
        }

        let settled = self.settled.read().await;
        Ok(event
            .orders
            .iter()
            .filter(|o| !settled.contains(&o.id))
            .map(|o| o.to_order(event_id))
            .collect())
    }

    async fn split_rule(&self, event_id: &EventId) -> Result<SplitRule> {
        let events = self.events.read().await;
        events
            .get(event_id)
            .map(|e| e.split_rule.clone())
            .ok_or_else(|| Error::OrderSource(format!("unknown event {}", event_id)))
    }

    async fn mark_settled(&self, _event_id: &EventId, order_ids: &[EntityId]) -> Result<()> {
        self.settled.write().await.extend(order_ids.iter().cloned());
        Ok(())
    }
}
