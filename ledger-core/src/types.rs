//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (signed `i64` minor units, never floating point)
//! - Closed polymorphism (actor types and money states are enums)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Actor id of the platform clearing account that holds order money until allocation.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create new identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get as string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Business object the money concerns (an order id, or a payout id)
    EntityId
);
string_id!(
    /// Party whose balance an entry affects
    ActorId
);
string_id!(
    /// Idempotency key of one transition
    ReferenceId
);
string_id!(
    /// Ticketed event that orders belong to
    EventId
);

impl ReferenceId {
    /// Deterministic reference for a transition applied to an entity
    pub fn for_transition(entity_id: &EntityId, transition: TransitionKind) -> Self {
        Self(format!("{}:{}", entity_id, transition.name()))
    }
}

/// Prefix of entities that record payouts; order ids may not start with it
pub const PAYOUT_ENTITY_PREFIX: &str = "payout:";

impl EntityId {
    /// Entity under which a payout is recorded
    pub fn for_payout(reference_id: &ReferenceId) -> Self {
        Self(format!("{}{}", PAYOUT_ENTITY_PREFIX, reference_id))
    }

    /// Whether this entity lives in the payout namespace
    pub fn is_payout(&self) -> bool {
        self.0.starts_with(PAYOUT_ENTITY_PREFIX)
    }
}

impl ActorId {
    /// The platform clearing account
    pub fn system() -> Self {
        Self(SYSTEM_ACTOR.to_string())
    }
}

/// Kind of party an actor id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    /// Platform clearing account
    System,
    /// Paying customer
    User,
    /// Venue
    Club,
    /// Event promoter
    Promoter,
    /// Platform operations account
    Platform,
}

impl ActorType {
    /// Lowercase tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::System => "system",
            ActorType::User => "user",
            ActorType::Club => "club",
            ActorType::Promoter => "promoter",
            ActorType::Platform => "platform",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(ActorType::System),
            "user" => Ok(ActorType::User),
            "club" => Ok(ActorType::Club),
            "promoter" => Ok(ActorType::Promoter),
            "platform" => Ok(ActorType::Platform),
            other => Err(crate::Error::InvalidEntry(format!("unknown actor type: {}", other))),
        }
    }
}

/// An actor id together with its type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Actor id
    pub id: ActorId,
    /// Actor type
    pub actor_type: ActorType,
}

impl Actor {
    /// Create new actor
    pub fn new(id: impl Into<String>, actor_type: ActorType) -> Self {
        Self {
            id: ActorId::new(id),
            actor_type,
        }
    }

    /// The platform clearing account
    pub fn system() -> Self {
        Self {
            id: ActorId::system(),
            actor_type: ActorType::System,
        }
    }

    /// Paying customer
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::User)
    }

    /// Venue
    pub fn club(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Club)
    }

    /// Promoter
    pub fn promoter(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Promoter)
    }

    /// Platform operations account
    pub fn platform(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::Platform)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.actor_type, self.id)
    }
}

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// British Pound
    GBP,
    /// Canadian Dollar
    CAD,
    /// Australian Dollar
    AUD,
    /// Mexican Peso
    MXN,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::MXN => "MXN",
        }
    }
}

impl FromStr for Currency {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "CAD" => Ok(Currency::CAD),
            "AUD" => Ok(Currency::AUD),
            "MXN" => Ok(Currency::MXN),
            other => Err(crate::Error::InvalidEntry(format!("unsupported currency: {}", other))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Stage of an order's money
///
/// ```text
/// AUTHORIZED → CAPTURED → HELD → SETTLED → PAYABLE → PAID
///      └──────────┴─────────┴───────┴─────────┴──→ REFUNDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MoneyState {
    /// Funds earmarked by the processor, not yet the platform's
    Authorized = 1,
    /// Funds captured by the processor
    Captured = 2,
    /// Funds received, inside the hold / dispute window
    Held = 3,
    /// Funds eligible for distribution
    Settled = 4,
    /// Funds owed to a payee
    Payable = 5,
    /// Funds paid out (terminal)
    Paid = 6,
    /// Funds returned to the payer (terminal)
    Refunded = 7,
}

impl MoneyState {
    /// All states in lifecycle order
    pub const ALL: [MoneyState; 7] = [
        MoneyState::Authorized,
        MoneyState::Captured,
        MoneyState::Held,
        MoneyState::Settled,
        MoneyState::Payable,
        MoneyState::Paid,
        MoneyState::Refunded,
    ];

    /// Transition table
    pub fn can_transition_to(self, to: MoneyState) -> bool {
        use MoneyState::*;
        matches!(
            (self, to),
            (Authorized, Captured)
                | (Captured, Held)
                | (Held, Settled)
                | (Settled, Payable)
                | (Payable, Paid)
                | (Authorized | Captured | Held | Settled | Payable, Refunded)
        )
    }

    /// Next state on the forward path
    pub fn next(self) -> Option<MoneyState> {
        match self {
            MoneyState::Authorized => Some(MoneyState::Captured),
            MoneyState::Captured => Some(MoneyState::Held),
            MoneyState::Held => Some(MoneyState::Settled),
            MoneyState::Settled => Some(MoneyState::Payable),
            MoneyState::Payable => Some(MoneyState::Paid),
            MoneyState::Paid | MoneyState::Refunded => None,
        }
    }

    /// Check if state is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, MoneyState::Paid | MoneyState::Refunded)
    }

    /// Uppercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            MoneyState::Authorized => "AUTHORIZED",
            MoneyState::Captured => "CAPTURED",
            MoneyState::Held => "HELD",
            MoneyState::Settled => "SETTLED",
            MoneyState::Payable => "PAYABLE",
            MoneyState::Paid => "PAID",
            MoneyState::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for MoneyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoneyState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        MoneyState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::InvalidEntry(format!("unknown money state: {}", s)))
    }
}

/// Kind of transition an entry-set records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TransitionKind {
    /// Payment authorized by the processor
    Authorize = 1,
    /// AUTHORIZED → CAPTURED
    Capture = 2,
    /// CAPTURED → HELD
    Hold = 3,
    /// HELD → SETTLED
    Settle = 4,
    /// SETTLED → PAYABLE, split across payees
    Allocate = 5,
    /// PAYABLE → PAID
    Payout = 6,
    /// Any pre-PAID state → REFUNDED
    Refund = 7,
}

impl TransitionKind {
    /// Stable name, used in reference ids
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::Authorize => "authorize",
            TransitionKind::Capture => "capture",
            TransitionKind::Hold => "hold",
            TransitionKind::Settle => "settle",
            TransitionKind::Allocate => "allocate",
            TransitionKind::Payout => "payout",
            TransitionKind::Refund => "refund",
        }
    }

    /// Source and target state of a forward transition
    ///
    /// `None` for authorization (no source) and refunds (any pre-PAID source).
    pub fn edge(&self) -> Option<(MoneyState, MoneyState)> {
        match self {
            TransitionKind::Authorize | TransitionKind::Refund => None,
            TransitionKind::Capture => Some((MoneyState::Authorized, MoneyState::Captured)),
            TransitionKind::Hold => Some((MoneyState::Captured, MoneyState::Held)),
            TransitionKind::Settle => Some((MoneyState::Held, MoneyState::Settled)),
            TransitionKind::Allocate => Some((MoneyState::Settled, MoneyState::Payable)),
            TransitionKind::Payout => Some((MoneyState::Payable, MoneyState::Paid)),
        }
    }

    /// Whether an entry-set of this kind may carry a leg in `state`
    pub fn permits(&self, state: MoneyState) -> bool {
        match self {
            TransitionKind::Authorize => state == MoneyState::Authorized,
            TransitionKind::Refund => {
                state == MoneyState::Refunded || state.can_transition_to(MoneyState::Refunded)
            }
            kind => kind
                .edge()
                .map(|(from, to)| from.can_transition_to(to) && (state == from || state == to))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// Global append position
    pub sequence: u64,

    /// Business object the money concerns
    pub entity_id: EntityId,

    /// Party whose balance this entry affects
    pub actor_id: ActorId,

    /// Actor type tag
    pub actor_type: ActorType,

    /// Money state of this entry
    pub state: MoneyState,

    /// Signed amount in minor units (positive = credit, negative = debit)
    pub amount: i64,

    /// Currency
    pub currency: Currency,

    /// Idempotency key of the entry-set this entry belongs to
    pub reference_id: ReferenceId,

    /// Transition that wrote this entry
    pub transition: TransitionKind,

    /// Processor reference (payment intent, capture, payout)
    pub external_ref: Option<String>,

    /// Audit label
    pub description: String,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

/// Order as seen at the engine boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id
    pub id: EntityId,

    /// Event the order belongs to
    pub event_id: EventId,

    /// Paying user
    pub user_id: ActorId,

    /// Total amount in minor units
    pub total_amount: i64,

    /// Currency
    pub currency: Currency,
}

impl Order {
    /// Paying user as an actor
    pub fn payer(&self) -> Actor {
        Actor {
            id: self.user_id.clone(),
            actor_type: ActorType::User,
        }
    }

    /// Deterministic reference of a transition on this order
    pub fn reference(&self, transition: TransitionKind) -> ReferenceId {
        ReferenceId::for_transition(&self.id, transition)
    }
}

/// One payee's share of a settled amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    /// Payee
    pub actor: Actor,

    /// Amount in minor units
    pub amount: i64,

    /// Audit label
    pub description: String,
}

impl Split {
    /// Create new split
    pub fn new(actor: Actor, amount: i64, description: impl Into<String>) -> Self {
        Self {
            actor,
            amount,
            description: description.into(),
        }
    }
}

/// Balance filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    /// Entity
    pub entity_id: Option<EntityId>,
    /// Actor
    pub actor_id: Option<ActorId>,
    /// Money state
    pub state: Option<MoneyState>,
    /// Currency
    pub currency: Option<Currency>,
}

impl EntryFilter {
    /// Filter matching every entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to an entity
    pub fn entity(mut self, entity_id: impl Into<EntityId>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Restrict to an actor
    pub fn actor(mut self, actor_id: impl Into<ActorId>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Restrict to a money state
    pub fn state(mut self, state: MoneyState) -> Self {
        self.state = Some(state);
        self
    }

    /// Restrict to a currency
    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Check whether an entry matches
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.entity_id.as_ref().map_or(true, |e| *e == entry.entity_id)
            && self.actor_id.as_ref().map_or(true, |a| *a == entry.actor_id)
            && self.state.map_or(true, |s| s == entry.state)
            && self.currency.map_or(true, |c| c == entry.currency)
    }
}

impl From<&EntityId> for EntityId {
    fn from(id: &EntityId) -> Self {
        id.clone()
    }
}

impl From<&ActorId> for ActorId {
    fn from(id: &ActorId) -> Self {
        id.clone()
    }
}

impl fmt::Display for EntryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(entity) = &self.entity_id {
            parts.push(format!("entity={}", entity));
        }
        if let Some(actor) = &self.actor_id {
            parts.push(format!("actor={}", actor));
        }
        if let Some(state) = self.state {
            parts.push(format!("state={}", state));
        }
        if let Some(currency) = self.currency {
            parts.push(format!("currency={}", currency));
        }
        if parts.is_empty() {
            f.write_str("{*}")
        } else {
            write!(f, "{{{}}}", parts.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_follows_transition_table() {
        let mut state = MoneyState::Authorized;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            visited.push(state);
        }
        assert_eq!(visited.len(), 6);
        assert_eq!(state, MoneyState::Paid);
    }

    #[test]
    fn test_refund_reachable_only_before_paid() {
        for state in MoneyState::ALL {
            let expected = !state.is_terminal();
            assert_eq!(state.can_transition_to(MoneyState::Refunded), expected, "{}", state);
        }
        assert!(!MoneyState::Settled.can_transition_to(MoneyState::Captured));
        assert!(!MoneyState::Authorized.can_transition_to(MoneyState::Settled));
    }

    #[test]
    fn test_transition_permits() {
        assert!(TransitionKind::Capture.permits(MoneyState::Authorized));
        assert!(TransitionKind::Capture.permits(MoneyState::Captured));
        assert!(!TransitionKind::Capture.permits(MoneyState::Held));
        assert!(TransitionKind::Authorize.permits(MoneyState::Authorized));
        assert!(!TransitionKind::Authorize.permits(MoneyState::Captured));
        assert!(TransitionKind::Refund.permits(MoneyState::Payable));
        assert!(!TransitionKind::Refund.permits(MoneyState::Paid));
    }

    #[test]
    fn test_reference_is_deterministic() {
        let order = EntityId::new("ord_42");
        assert_eq!(
            ReferenceId::for_transition(&order, TransitionKind::Settle).as_str(),
            "ord_42:settle"
        );
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!("club".parse::<ActorType>().unwrap(), ActorType::Club);
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!("payable".parse::<MoneyState>().unwrap(), MoneyState::Payable);
        assert!("XYZ".parse::<Currency>().is_err());
    }

    #[test]
    fn test_filter_display() {
        let filter = EntryFilter::new().entity("ord_1").state(MoneyState::Settled);
        assert_eq!(filter.to_string(), "{entity=ord_1, state=SETTLED}");
        assert_eq!(EntryFilter::new().to_string(), "{*}");
    }
}
