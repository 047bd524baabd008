//! Balanced entry-sets, the unit of atomicity
//!
//! Every transition builds one [`EntrySet`]: a group of legs whose amounts sum to
//! zero, tagged with the transition kind, an idempotency key, and the balance
//! requirements that must hold at commit time. Stores evaluate the idempotency check
//! and the requirements inside the same critical section as the write.

use crate::{
    crypto::{hash_canonical, Fingerprint},
    types::{Actor, Currency, EntityId, EntryFilter, LedgerEntry, MoneyState, ReferenceId, TransitionKind},
    Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One side of a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    /// Actor whose balance moves
    pub actor: Actor,
    /// Money state of the leg
    pub state: MoneyState,
    /// Signed amount in minor units
    pub amount: i64,
    /// Audit label
    pub description: String,
}

/// Expected balance at commit time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    /// Balance must equal the value
    Exactly(i64),
    /// Balance must be at least the value
    AtLeast(i64),
}

impl Requirement {
    /// Check a balance against the requirement
    pub fn holds(&self, balance: i64) -> bool {
        match *self {
            Requirement::Exactly(expected) => balance == expected,
            Requirement::AtLeast(minimum) => balance >= minimum,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Exactly(v) => write!(f, "== {}", v),
            Requirement::AtLeast(v) => write!(f, ">= {}", v),
        }
    }
}

/// Balance precondition of an entry-set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRequirement {
    /// Balance to read
    pub filter: EntryFilter,
    /// Expected value
    pub requirement: Requirement,
}

/// Balanced group of legs written atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySet {
    entity_id: EntityId,
    reference_id: ReferenceId,
    transition: TransitionKind,
    currency: Currency,
    external_ref: Option<String>,
    legs: Vec<Leg>,
    requirements: Vec<BalanceRequirement>,
}

/// Fields that identify the content of an entry-set
#[derive(Serialize)]
struct Canonical<'a> {
    entity_id: &'a EntityId,
    reference_id: &'a ReferenceId,
    transition: TransitionKind,
    currency: Currency,
    external_ref: &'a Option<String>,
    legs: &'a [Leg],
}

impl EntrySet {
    /// Start an empty entry-set
    pub fn new(
        entity_id: EntityId,
        reference_id: ReferenceId,
        transition: TransitionKind,
        currency: Currency,
    ) -> Self {
        Self {
            entity_id,
            reference_id,
            transition,
            currency,
            external_ref: None,
            legs: Vec::new(),
            requirements: Vec::new(),
        }
    }

    /// Attach a processor reference
    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    /// Add a leg
    pub fn leg(
        mut self,
        actor: &Actor,
        state: MoneyState,
        amount: i64,
        description: impl Into<String>,
    ) -> Self {
        self.legs.push(Leg {
            actor: actor.clone(),
            state,
            amount,
            description: description.into(),
        });
        self
    }

    /// Add a balance requirement checked at commit time
    pub fn require(mut self, filter: EntryFilter, requirement: Requirement) -> Self {
        self.requirements.push(BalanceRequirement {
            filter,
            requirement,
        });
        self
    }

    /// Entity
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Idempotency key
    pub fn reference_id(&self) -> &ReferenceId {
        &self.reference_id
    }

    /// Transition kind
    pub fn transition(&self) -> TransitionKind {
        self.transition
    }

    /// Currency
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Legs
    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    /// Balance requirements
    pub fn requirements(&self) -> &[BalanceRequirement] {
        &self.requirements
    }

    /// Sum of credited amounts, i.e. the money the set moves
    pub fn moved_amount(&self) -> i64 {
        self.legs.iter().map(|l| l.amount).filter(|a| *a > 0).sum()
    }

    /// Validate structure and the zero-sum invariant
    pub fn validate(&self) -> Result<()> {
        if self.entity_id.as_str().is_empty() {
            return Err(Error::InvalidEntry("entity id must not be empty".to_string()));
        }
        if self.reference_id.as_str().is_empty() {
            return Err(Error::InvalidEntry("reference id must not be empty".to_string()));
        }
        if self.legs.len() < 2 {
            return Err(Error::InvalidEntry(format!(
                "entry-set {} has {} legs, at least 2 required",
                self.reference_id,
                self.legs.len()
            )));
        }

        for leg in &self.legs {
            if leg.amount == 0 {
                return Err(Error::InvalidEntry(format!(
                    "zero-amount leg for {} in entry-set {}",
                    leg.actor, self.reference_id
                )));
            }
            if leg.actor.id.as_str().is_empty() {
                return Err(Error::InvalidEntry("actor id must not be empty".to_string()));
            }
            if !self.transition.permits(leg.state) {
                return Err(Error::InvalidTransition {
                    entity_id: self.entity_id.clone(),
                    transition: self.transition,
                    reason: format!("leg in state {} is not permitted", leg.state),
                });
            }
        }

        let imbalance: i128 = self.legs.iter().map(|l| l.amount as i128).sum();
        if imbalance != 0 {
            return Err(Error::Unbalanced {
                reference_id: self.reference_id.clone(),
                imbalance,
            });
        }

        Ok(())
    }

    /// SHA-256 over the canonical content (legs, ids, currency, processor reference)
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        hash_canonical(&Canonical {
            entity_id: &self.entity_id,
            reference_id: &self.reference_id,
            transition: self.transition,
            currency: self.currency,
            external_ref: &self.external_ref,
            legs: &self.legs,
        })
    }

    /// Evaluate every requirement with the given balance reader
    pub(crate) fn check_requirements(
        &self,
        mut balance_of: impl FnMut(&EntryFilter) -> Result<i64>,
    ) -> Result<()> {
        for req in &self.requirements {
            let balance = balance_of(&req.filter)?;
            if !req.requirement.holds(balance) {
                return Err(Error::InvalidTransition {
                    entity_id: self.entity_id.clone(),
                    transition: self.transition,
                    reason: format!(
                        "balance {} is {}, expected {}",
                        req.filter, balance, req.requirement
                    ),
                });
            }
        }
        Ok(())
    }

    /// Turn legs into immutable entries starting at `first_sequence`
    pub(crate) fn materialize(&self, first_sequence: u64, now: DateTime<Utc>) -> Vec<LedgerEntry> {
        self.legs
            .iter()
            .enumerate()
            .map(|(i, leg)| LedgerEntry {
                entry_id: Uuid::now_v7(),
                sequence: first_sequence + i as u64,
                entity_id: self.entity_id.clone(),
                actor_id: leg.actor.id.clone(),
                actor_type: leg.actor.actor_type,
                state: leg.state,
                amount: leg.amount,
                currency: self.currency,
                reference_id: self.reference_id.clone(),
                transition: self.transition,
                external_ref: self.external_ref.clone(),
                description: leg.description.clone(),
                created_at: now,
            })
            .collect()
    }
}

/// Record of a committed entry-set, stored under its idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Entity
    pub entity_id: EntityId,
    /// Idempotency key
    pub reference_id: ReferenceId,
    /// Transition kind
    pub transition: TransitionKind,
    /// Entries written, in append order
    pub entry_ids: Vec<Uuid>,
    /// Sequence of the first entry
    pub first_sequence: u64,
    /// Money moved by the set
    pub amount: i64,
    /// Content fingerprint
    pub fingerprint: Fingerprint,
    /// Commit timestamp
    pub committed_at: DateTime<Utc>,
}

impl Receipt {
    /// Build a receipt for freshly materialized entries
    pub(crate) fn for_entries(set: &EntrySet, entries: &[LedgerEntry], fingerprint: Fingerprint) -> Self {
        Self {
            entity_id: set.entity_id.clone(),
            reference_id: set.reference_id.clone(),
            transition: set.transition,
            entry_ids: entries.iter().map(|e| e.entry_id).collect(),
            first_sequence: entries.first().map(|e| e.sequence).unwrap_or_default(),
            amount: set.moved_amount(),
            fingerprint,
            committed_at: entries.first().map(|e| e.created_at).unwrap_or_else(Utc::now),
        }
    }

    /// Fingerprint as lowercase hex
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }
}

/// Sum amounts without overflow
pub(crate) fn sum_amounts(amounts: impl Iterator<Item = i64>) -> Result<i64> {
    let total: i128 = amounts.map(i128::from).sum();
    i64::try_from(total).map_err(|_| Error::InvalidEntry(format!("balance {} overflows i64", total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture_set(amount: i64) -> EntrySet {
        let entity = EntityId::new("ord_1");
        EntrySet::new(
            entity.clone(),
            ReferenceId::for_transition(&entity, TransitionKind::Capture),
            TransitionKind::Capture,
            Currency::USD,
        )
        .leg(&Actor::system(), MoneyState::Authorized, -amount, "release authorization")
        .leg(&Actor::system(), MoneyState::Captured, amount, "capture")
    }

    #[test]
    fn test_balanced_set_validates() {
        let set = capture_set(1000);
        set.validate().unwrap();
        assert_eq!(set.moved_amount(), 1000);
    }

    #[test]
    fn test_unbalanced_set_rejected() {
        let set = capture_set(1000).leg(&Actor::club("club_1"), MoneyState::Captured, 5, "stray");
        match set.validate() {
            Err(Error::Unbalanced { imbalance, .. }) => assert_eq!(imbalance, 5),
            other => panic!("expected Unbalanced, got {:?}", other),
        }
    }

    #[test]
    fn test_single_leg_rejected() {
        let entity = EntityId::new("ord_1");
        let set = EntrySet::new(
            entity.clone(),
            ReferenceId::new("ord_1:authorize"),
            TransitionKind::Authorize,
            Currency::USD,
        )
        .leg(&Actor::system(), MoneyState::Authorized, 10, "alone");
        assert!(matches!(set.validate(), Err(Error::InvalidEntry(_))));
    }

    #[test]
    fn test_state_outside_transition_rejected() {
        let entity = EntityId::new("ord_1");
        let set = EntrySet::new(
            entity,
            ReferenceId::new("ord_1:capture"),
            TransitionKind::Capture,
            Currency::USD,
        )
        .leg(&Actor::system(), MoneyState::Authorized, -10, "a")
        .leg(&Actor::system(), MoneyState::Settled, 10, "skip ahead");
        assert!(matches!(set.validate(), Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = capture_set(1000).fingerprint().unwrap();
        let b = capture_set(1000).fingerprint().unwrap();
        let c = capture_set(999).fingerprint().unwrap();
        let d = capture_set(1000).with_external_ref("ch_1").fingerprint().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_requirements() {
        let set = capture_set(1000).require(
            EntryFilter::new().entity("ord_1").state(MoneyState::Authorized),
            Requirement::Exactly(1000),
        );
        set.check_requirements(|_| Ok(1000)).unwrap();
        assert!(matches!(
            set.check_requirements(|_| Ok(0)),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(Requirement::AtLeast(5).holds(7));
        assert!(!Requirement::AtLeast(5).holds(4));
    }

    #[test]
    fn test_sum_amounts_overflow() {
        assert_eq!(sum_amounts([5, -3].into_iter()).unwrap(), 2);
        assert!(sum_amounts([i64::MAX, 1].into_iter()).is_err());
    }
}
