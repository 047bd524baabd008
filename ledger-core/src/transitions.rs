//! State transition API
//!
//! Each operation builds one balanced entry-set keyed by `"<order-id>:<transition>"`
//! and commits it through the single writer. The prerequisite balance travels with the
//! set as a requirement, so the store checks it in the same critical section as the
//! idempotency key.

use crate::{
    entry_set::{sum_amounts, EntrySet, Receipt, Requirement},
    ledger::{holdings, Holding, Ledger},
    types::{Actor, ActorId, Currency, EntityId, EntryFilter, MoneyState, Order, ReferenceId, TransitionKind},
    Error, Result,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Outcome of a transition call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "receipt", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// Entries were written by this call
    Applied(Receipt),
    /// The reference was already committed with identical content; nothing written
    AlreadyProcessed(Receipt),
}

impl TransitionOutcome {
    /// Receipt of the committed entry-set
    pub fn receipt(&self) -> &Receipt {
        match self {
            TransitionOutcome::Applied(r) | TransitionOutcome::AlreadyProcessed(r) => r,
        }
    }

    /// Entries were written by this call
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    /// Replay of an earlier call
    pub fn is_already_processed(&self) -> bool {
        matches!(self, TransitionOutcome::AlreadyProcessed(_))
    }
}

impl Ledger {
    /// Record a processor authorization for an order
    ///
    /// Writes `(SYSTEM, AUTHORIZED, +total)` against `(user, AUTHORIZED, -total)`.
    pub async fn record_order_authorized(
        &self,
        order: &Order,
        payment_intent_ref: &str,
    ) -> Result<TransitionOutcome> {
        check_order(order)?;

        let set = EntrySet::new(
            order.id.clone(),
            order.reference(TransitionKind::Authorize),
            TransitionKind::Authorize,
            order.currency,
        )
        .with_external_ref(payment_intent_ref)
        .leg(&Actor::system(), MoneyState::Authorized, order.total_amount, "payment authorized")
        .leg(&order.payer(), MoneyState::Authorized, -order.total_amount, "funds earmarked by payer");

        self.commit(set).await
    }

    /// AUTHORIZED → CAPTURED
    pub async fn record_order_captured(&self, order: &Order, payment_ref: &str) -> Result<TransitionOutcome> {
        self.advance(order, TransitionKind::Capture, Some(payment_ref)).await
    }

    /// CAPTURED → HELD
    pub async fn hold_order_revenue(&self, order: &Order) -> Result<TransitionOutcome> {
        self.advance(order, TransitionKind::Hold, None).await
    }

    /// HELD → SETTLED
    pub async fn settle_order_revenue(&self, order: &Order) -> Result<TransitionOutcome> {
        self.advance(order, TransitionKind::Settle, None).await
    }

    /// Move an actor's PAYABLE balance into PAID
    ///
    /// Recorded under entity `payout:<reference>`. The actor's PAYABLE balance in
    /// `currency` must cover `amount` at commit time.
    pub async fn record_payout(
        &self,
        actor: &Actor,
        amount: i64,
        currency: Currency,
        reference_id: &ReferenceId,
    ) -> Result<TransitionOutcome> {
        if amount <= 0 {
            return Err(Error::InvalidEntry(format!(
                "payout {} amount must be positive, got {}",
                reference_id, amount
            )));
        }

        let set = EntrySet::new(
            EntityId::for_payout(reference_id),
            reference_id.clone(),
            TransitionKind::Payout,
            currency,
        )
        .with_external_ref(reference_id.as_str())
        .leg(actor, MoneyState::Payable, -amount, "payout issued")
        .leg(actor, MoneyState::Paid, amount, "payout issued")
        .require(
            EntryFilter::new()
                .actor(&actor.id)
                .state(MoneyState::Payable)
                .currency(currency),
            Requirement::AtLeast(amount),
        );

        self.commit(set).await
    }

    /// Return an order's money to the payer from whichever pre-PAID state holds it
    ///
    /// Full refunds only. From PAYABLE every payee must still hold its share, i.e. not
    /// have been paid out beyond what remains payable.
    pub async fn refund_order(&self, order: &Order, refund_ref: &str) -> Result<TransitionOutcome> {
        check_order(order)?;

        let reference = order.reference(TransitionKind::Refund);
        if let Some(receipt) = self.receipt(&order.id, &reference)? {
            tracing::debug!(order_id = %order.id, reference_id = %reference, "Refund already recorded");
            return Ok(TransitionOutcome::AlreadyProcessed(receipt));
        }

        let entries = self.entries(&EntryFilter::new().entity(&order.id))?;
        let held: Vec<Holding> = holdings(&entries)?
            .into_iter()
            .filter(|holding| holding.state != MoneyState::Refunded)
            .collect();

        if let Some(holding) = held.iter().find(|holding| holding.state.is_terminal()) {
            return Err(invalid(
                order,
                TransitionKind::Refund,
                format!("money is already {}", holding.state),
            ));
        }

        let held_total: i128 = held.iter().map(|holding| i128::from(holding.amount)).sum();
        if held_total != i128::from(order.total_amount) {
            return Err(invalid(
                order,
                TransitionKind::Refund,
                format!("order holds {}, expected {}", held_total, order.total_amount),
            ));
        }

        let mut set = EntrySet::new(order.id.clone(), reference, TransitionKind::Refund, order.currency)
            .with_external_ref(refund_ref);

        // Requirements filter by actor id, so one id holding in two roles is checked once
        let mut guarded: BTreeMap<(ActorId, MoneyState), i64> = BTreeMap::new();
        for holding in &held {
            set = set.leg(
                &holding.actor,
                holding.state,
                -holding.amount,
                format!("refund reversal from {}", holding.state),
            );
            *guarded
                .entry((holding.actor.id.clone(), holding.state))
                .or_default() += holding.amount;
        }

        for ((actor_id, state), amount) in guarded {
            let balance = sum_amounts(
                entries
                    .iter()
                    .filter(|e| e.actor_id == actor_id && e.state == state)
                    .map(|e| e.amount),
            )?;
            set = set.require(
                EntryFilter::new().entity(&order.id).actor(&actor_id).state(state),
                Requirement::Exactly(balance),
            );

            if state == MoneyState::Payable {
                set = set.require(
                    EntryFilter::new()
                        .actor(&actor_id)
                        .state(MoneyState::Payable)
                        .currency(order.currency),
                    Requirement::AtLeast(amount),
                );
            }
        }

        let set = set.leg(&order.payer(), MoneyState::Refunded, order.total_amount, "refunded to payer");
        self.commit(set).await
    }

    /// Single-edge SYSTEM transition guarded by an exact source balance
    async fn advance(
        &self,
        order: &Order,
        kind: TransitionKind,
        external_ref: Option<&str>,
    ) -> Result<TransitionOutcome> {
        check_order(order)?;
        let (from, to) = kind
            .edge()
            .ok_or_else(|| invalid(order, kind, "transition has no single source state".to_string()))?;

        let system = Actor::system();
        let mut set = EntrySet::new(order.id.clone(), order.reference(kind), kind, order.currency)
            .leg(&system, from, -order.total_amount, format!("release {}", from))
            .leg(&system, to, order.total_amount, format!("{} revenue", to))
            .require(
                EntryFilter::new().entity(&order.id).actor(&system.id).state(from),
                Requirement::Exactly(order.total_amount),
            );
        if let Some(external_ref) = external_ref {
            set = set.with_external_ref(external_ref);
        }

        self.commit(set).await
    }

    /// Commit a set and fold replays into an outcome
    pub(crate) async fn commit(&self, set: EntrySet) -> Result<TransitionOutcome> {
        let entity_id = set.entity_id().clone();
        let reference_id = set.reference_id().clone();
        let transition = set.transition();

        match self.post(set).await {
            Ok(receipt) => {
                tracing::info!(
                    entity_id = %entity_id,
                    reference_id = %reference_id,
                    transition = %transition,
                    amount = receipt.amount,
                    "Transition applied"
                );
                Ok(TransitionOutcome::Applied(receipt))
            }
            Err(Error::AlreadyProcessed { .. }) => {
                tracing::debug!(
                    entity_id = %entity_id,
                    reference_id = %reference_id,
                    "Transition already processed"
                );
                self.replayed(&entity_id, &reference_id)
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn replayed(&self, entity_id: &EntityId, reference_id: &ReferenceId) -> Result<TransitionOutcome> {
        let receipt = self.receipt(entity_id, reference_id)?.ok_or_else(|| {
            Error::StoreUnavailable(format!("receipt for {} / {} not readable", entity_id, reference_id))
        })?;
        Ok(TransitionOutcome::AlreadyProcessed(receipt))
    }
}

pub(crate) fn check_order(order: &Order) -> Result<()> {
    if order.id.is_payout() {
        return Err(Error::InvalidEntry(format!(
            "order id {} is reserved for payouts",
            order.id
        )));
    }
    if order.total_amount <= 0 {
        return Err(Error::InvalidEntry(format!(
            "order {} total must be positive, got {}",
            order.id, order.total_amount
        )));
    }
    Ok(())
}

pub(crate) fn invalid(order: &Order, transition: TransitionKind, reason: String) -> Error {
    Error::InvalidTransition {
        entity_id: order.id.clone(),
        transition,
        reason,
    }
}
