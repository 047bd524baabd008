//! Single-writer actor for the ledger
//!
//! Every append goes through one Tokio task that owns the write side of the store:
//! - One logical writer serializes the idempotency check, the balance requirements
//!   and the write
//! - A bounded mailbox gives callers backpressure
//! - Reads bypass the actor and go to the store directly
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Transitions / allocator / orchestrator         │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends entry-sets to actor mailbox             │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │     LedgerStore::append() per entry-set (atomic)      │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    entry_set::{EntrySet, Receipt},
    metrics::LedgerMetrics,
    storage::LedgerStore,
    Error, Result,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Append a balanced entry-set
    Append {
        /// Entry-set to write
        set: EntrySet,
        /// Commit outcome
        response: oneshot::Sender<Result<Receipt>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns the write path
pub struct LedgerActor {
    /// Storage backend
    store: Arc<dyn LedgerStore>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Writer metrics
    metrics: LedgerMetrics,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor").finish_non_exhaustive()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        store: Arc<dyn LedgerStore>,
        mailbox: mpsc::Receiver<LedgerMessage>,
        metrics: LedgerMetrics,
    ) -> Self {
        Self {
            store,
            mailbox,
            metrics,
        }
    }

    /// Run the actor event loop until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Append { set, response } => {
                    let result = self.append(&set);
                    let _ = response.send(result);
                }
                LedgerMessage::Shutdown => {
                    tracing::info!("Ledger writer shutting down");
                    break;
                }
            }
        }
    }

    fn append(&self, set: &EntrySet) -> Result<Receipt> {
        let start = Instant::now();
        let result = self.store.append(set);
        self.metrics
            .record_append_duration(start.elapsed().as_secs_f64());

        match &result {
            Ok(receipt) => self.metrics.record_commit(receipt.entry_ids.len()),
            Err(e) => {
                self.metrics.record_error(e);
                if !e.is_already_processed() {
                    tracing::warn!(
                        entity_id = %set.entity_id(),
                        reference_id = %set.reference_id(),
                        transition = %set.transition(),
                        error = %e,
                        "Entry-set rejected"
                    );
                }
            }
        }

        result
    }
}

/// Handle for sending entry-sets to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    /// Append an entry-set and wait for the commit outcome
    pub async fn append(&self, set: EntrySet) -> Result<Receipt> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LedgerMessage::Append { set, response: tx })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(
    store: Arc<dyn LedgerStore>,
    metrics: LedgerMetrics,
    mailbox_capacity: usize,
) -> LedgerHandle {
    // Bounded channel for backpressure
    let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
    let actor = LedgerActor::new(store, rx, metrics);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::{Actor, Currency, EntityId, MoneyState, ReferenceId, TransitionKind};

    fn authorize_set(order: &str, amount: i64) -> EntrySet {
        let entity = EntityId::new(order);
        EntrySet::new(
            entity.clone(),
            ReferenceId::for_transition(&entity, TransitionKind::Authorize),
            TransitionKind::Authorize,
            Currency::USD,
        )
        .leg(&Actor::system(), MoneyState::Authorized, amount, "authorized")
        .leg(&Actor::user("user_1"), MoneyState::Authorized, -amount, "earmarked")
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_ledger_actor(store, LedgerMetrics::new().unwrap(), 8);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_append() {
        let store = Arc::new(MemoryStore::new());
        let metrics = LedgerMetrics::new().unwrap();
        let handle = spawn_ledger_actor(store.clone(), metrics.clone(), 8);

        let receipt = handle.append(authorize_set("ord_1", 500)).await.unwrap();
        assert_eq!(receipt.amount, 500);
        assert_eq!(store.len(), 2);

        let replay = handle.append(authorize_set("ord_1", 500)).await;
        assert!(replay.unwrap_err().is_already_processed());

        assert_eq!(metrics.entry_sets_committed.get(), 1);
        assert_eq!(metrics.replays.get(), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_after_shutdown_fails() {
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_ledger_actor(store, LedgerMetrics::new().unwrap(), 1);
        handle.shutdown().await.unwrap();

        // Let the actor drain the shutdown message and exit
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let err = handle.append(authorize_set("ord_1", 500)).await.unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialize() {
        let store = Arc::new(MemoryStore::new());
        let handle = spawn_ledger_actor(store.clone(), LedgerMetrics::new().unwrap(), 4);

        let mut tasks = Vec::new();
        for i in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.append(authorize_set(&format!("ord_{}", i), 100)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.len(), 40);
        handle.shutdown().await.unwrap();
    }
}
