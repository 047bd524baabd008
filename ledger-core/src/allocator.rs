//! Split allocator
//!
//! Distributes an order's SETTLED balance into payee PAYABLE balances as one atomic
//! entry-set. The split amounts must add up to the settled balance exactly; a
//! mismatch is reported before anything is written.

use crate::{
    entry_set::{EntrySet, Requirement},
    ledger::Ledger,
    transitions::{check_order, invalid, TransitionOutcome},
    storage::replay_error,
    types::{Actor, EntryFilter, MoneyState, Order, Split, TransitionKind},
    Error, Result,
};

/// Sum of split amounts, without overflow
pub fn split_total(splits: &[Split]) -> i128 {
    splits.iter().map(|s| i128::from(s.amount)).sum()
}

impl Ledger {
    /// SETTLED → PAYABLE across payees
    ///
    /// Per split, debits the order's SETTLED balance and credits `(payee, PAYABLE)`.
    /// Fails with [`Error::SplitMismatch`] and writes nothing unless the splits sum to
    /// the settled balance. A retry with the same splits reports `AlreadyProcessed`.
    pub async fn allocate_to_payable(&self, order: &Order, splits: &[Split]) -> Result<TransitionOutcome> {
        check_order(order)?;

        if let Some(split) = splits.iter().find(|s| s.amount <= 0) {
            return Err(Error::InvalidEntry(format!(
                "split for {} on order {} must be positive, got {}",
                split.actor, order.id, split.amount
            )));
        }

        let system = Actor::system();
        let reference = order.reference(TransitionKind::Allocate);
        let set = splits.iter().fold(
            EntrySet::new(order.id.clone(), reference.clone(), TransitionKind::Allocate, order.currency),
            |set, split| {
                set.leg(&system, MoneyState::Settled, -split.amount, format!("allocate to {}", split.actor))
                    .leg(&split.actor, MoneyState::Payable, split.amount, split.description.clone())
            },
        );

        // Retries are recognized before the settled balance is consulted
        if let Some(receipt) = self.receipt(&order.id, &reference)? {
            let err = replay_error(&set, &receipt, set.fingerprint()?);
            return match err {
                Error::AlreadyProcessed { .. } => Ok(TransitionOutcome::AlreadyProcessed(receipt)),
                other => Err(other),
            };
        }

        let settled_filter = EntryFilter::new()
            .entity(&order.id)
            .actor(&system.id)
            .state(MoneyState::Settled);
        let settled = self.get_balance(&settled_filter)?;
        if settled <= 0 {
            return Err(invalid(
                order,
                TransitionKind::Allocate,
                format!("settled balance is {}", settled),
            ));
        }

        let actual = split_total(splits);
        if actual != i128::from(settled) {
            tracing::error!(
                order_id = %order.id,
                expected = settled,
                actual = %actual,
                splits = splits.len(),
                "Split amounts do not match settled balance"
            );
            return Err(Error::SplitMismatch {
                entity_id: order.id.clone(),
                expected: settled,
                actual,
            });
        }

        // Settled balance must still match at commit time
        let set = set.require(settled_filter, Requirement::Exactly(settled));
        self.commit(set).await
    }
}
