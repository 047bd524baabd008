//! Split rules
//!
//! A split rule turns an order's settled amount into per-payee splits. Percentage
//! rules floor every share and hand the rounding remainder to one designated actor,
//! so the splits always add up to the amount exactly.

use crate::{Error, Result};
use revenue_ledger::{Actor, Split};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One payee's percentage share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Payee
    pub actor: Actor,
    /// Fraction of the amount, in (0, 1]
    pub share: Decimal,
    /// Audit label
    pub description: String,
}

/// How an event's settled revenue is distributed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitRule {
    /// Fixed amounts; must add up to each order's settled balance
    Fixed {
        /// Splits applied verbatim
        splits: Vec<Split>,
    },

    /// Fractions of the amount summing to exactly one
    Percentage {
        /// Payee shares
        shares: Vec<Share>,
        /// Receives the rounding remainder
        remainder_to: Actor,
    },
}

impl SplitRule {
    /// Check the rule's own consistency
    pub fn validate(&self) -> Result<()> {
        match self {
            SplitRule::Fixed { splits } => {
                if splits.is_empty() {
                    return Err(Error::SplitRule("fixed rule has no splits".to_string()));
                }
                if let Some(split) = splits.iter().find(|s| s.amount <= 0) {
                    return Err(Error::SplitRule(format!(
                        "fixed split for {} must be positive, got {}",
                        split.actor, split.amount
                    )));
                }
            }
            SplitRule::Percentage { shares, .. } => {
                if shares.is_empty() {
                    return Err(Error::SplitRule("percentage rule has no shares".to_string()));
                }
                if let Some(share) = shares
                    .iter()
                    .find(|s| s.share <= Decimal::ZERO || s.share > Decimal::ONE)
                {
                    return Err(Error::SplitRule(format!(
                        "share for {} must be in (0, 1], got {}",
                        share.actor, share.share
                    )));
                }
                let total: Decimal = shares.iter().map(|s| s.share).sum();
                if total != Decimal::ONE {
                    return Err(Error::SplitRule(format!("shares sum to {}, expected 1", total)));
                }
            }
        }
        Ok(())
    }

    /// Splits for a settled amount
    ///
    /// Zero-amount splits are omitted. Fixed rules are returned as configured; the
    /// allocator rejects them if they do not match the settled balance.
    pub fn splits_for(&self, amount: i64) -> Result<Vec<Split>> {
        self.validate()?;
        if amount <= 0 {
            return Err(Error::SplitRule(format!("amount must be positive, got {}", amount)));
        }

        match self {
            SplitRule::Fixed { splits } => Ok(splits.clone()),
            SplitRule::Percentage {
                shares,
                remainder_to,
            } => {
                let base = Decimal::from(amount);
                let mut splits = Vec::with_capacity(shares.len() + 1);
                let mut allocated: i64 = 0;

                for share in shares {
                    let part = base
                        .checked_mul(share.share)
                        .and_then(|v| v.floor().to_i64())
                        .ok_or_else(|| {
                            Error::SplitRule(format!("share of {} overflows for {}", share.actor, amount))
                        })?;
                    allocated += part;
                    splits.push(Split::new(share.actor.clone(), part, share.description.clone()));
                }

                let remainder = amount - allocated;
                if remainder > 0 {
                    match splits.iter_mut().find(|s| s.actor == *remainder_to) {
                        Some(split) => split.amount += remainder,
                        None => splits.push(Split::new(remainder_to.clone(), remainder, "rounding remainder")),
                    }
                }

                splits.retain(|s| s.amount > 0);
                Ok(splits)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn three_way() -> SplitRule {
        SplitRule::Percentage {
            shares: vec![
                Share {
                    actor: Actor::club("club_1"),
                    share: dec!(0.7),
                    description: "venue share".to_string(),
                },
                Share {
                    actor: Actor::promoter("promo_1"),
                    share: dec!(0.1),
                    description: "promoter share".to_string(),
                },
                Share {
                    actor: Actor::platform("platform"),
                    share: dec!(0.2),
                    description: "platform fee".to_string(),
                },
            ],
            remainder_to: Actor::platform("platform"),
        }
    }

    fn amounts(splits: &[Split]) -> Vec<i64> {
        splits.iter().map(|s| s.amount).collect()
    }

    #[test]
    fn test_percentage_exact() {
        let splits = three_way().splits_for(1000).unwrap();
        assert_eq!(amounts(&splits), vec![700, 100, 200]);
    }

    #[test]
    fn test_remainder_goes_to_designated_actor() {
        // 0.7 * 999 = 699.3, 0.1 * 999 = 99.9, 0.2 * 999 = 199.8
        let splits = three_way().splits_for(999).unwrap();
        assert_eq!(amounts(&splits), vec![699, 99, 201]);
    }

    #[test]
    fn test_zero_splits_omitted() {
        let splits = three_way().splits_for(1).unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].actor, Actor::platform("platform"));
        assert_eq!(splits[0].amount, 1);
    }

    #[test]
    fn test_shares_must_sum_to_one() {
        let rule = SplitRule::Percentage {
            shares: vec![Share {
                actor: Actor::club("club_1"),
                share: dec!(0.95),
                description: "venue".to_string(),
            }],
            remainder_to: Actor::platform("platform"),
        };
        assert!(matches!(rule.splits_for(1000), Err(Error::SplitRule(_))));
    }

    #[test]
    fn test_fixed_rule_passthrough() {
        let rule = SplitRule::Fixed {
            splits: vec![
                Split::new(Actor::club("club_1"), 600, "venue"),
                Split::new(Actor::platform("platform"), 400, "fee"),
            ],
        };
        assert_eq!(amounts(&rule.splits_for(1000).unwrap()), vec![600, 400]);
        assert_eq!(amounts(&rule.splits_for(900).unwrap()), vec![600, 400]);
        assert!(rule.splits_for(0).is_err());
    }

    #[test]
    fn test_rule_json_shape() {
        let json = r#"{
            "kind": "percentage",
            "shares": [
                {"actor": {"id": "club_1", "actor_type": "club"}, "share": "0.5", "description": "venue"},
                {"actor": {"id": "platform", "actor_type": "platform"}, "share": "0.5", "description": "fee"}
            ],
            "remainder_to": {"id": "platform", "actor_type": "platform"}
        }"#;
        let rule: SplitRule = serde_json::from_str(json).unwrap();
        assert_eq!(amounts(&rule.splits_for(101).unwrap()), vec![50, 51]);
    }

    proptest! {
        #[test]
        fn prop_percentage_splits_sum_exactly(amount in 1i64..1_000_000_000_000i64) {
            let splits = three_way().splits_for(amount).unwrap();
            let total: i64 = splits.iter().map(|s| s.amount).sum();
            prop_assert_eq!(total, amount);
            prop_assert!(splits.iter().all(|s| s.amount > 0));
        }
    }
}
