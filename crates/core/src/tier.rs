//! Ticket tiers and availability arithmetic.
//!
//! Pure functions only. Every gateway implementation evaluates reservations
//! through [`evaluate_reservation`] while holding its own lock on the tier,
//! so the in-memory and Postgres gateways deny for exactly the same reasons.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, MinorUnits, Timestamp, Units};

/// A priced product definition bound to one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTier {
    pub id: DbId,
    pub event_id: DbId,
    pub name: String,
    pub price: MinorUnits,
    pub currency: String,
    pub quota: Units,
    pub sold: Units,
    pub min_purchase: Units,
    pub max_purchase: Option<Units>,
    pub sale_starts_at: Option<Timestamp>,
    pub sale_ends_at: Option<Timestamp>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Where `now` falls relative to a tier's sale window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleWindowState {
    NotStarted,
    Open,
    Ended,
}

impl TicketTier {
    /// The sale window is half-open: `[sale_starts_at, sale_ends_at)`.
    /// A missing bound is unbounded on that side.
    pub fn sale_window_state(&self, now: Timestamp) -> SaleWindowState {
        if self.sale_starts_at.is_some_and(|start| now < start) {
            SaleWindowState::NotStarted
        } else if self.sale_ends_at.is_some_and(|end| now >= end) {
            SaleWindowState::Ended
        } else {
            SaleWindowState::Open
        }
    }
}

/// Why a reservation was refused. Not an error: a sold-out tier is an
/// expected business outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    TierInactive,
    SaleNotStarted,
    SaleEnded,
    BelowMinimum { minimum: Units },
    AboveMaximum { maximum: Units },
    Insufficient { requested: Units, available: Units },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TierInactive => write!(f, "tier is not on sale"),
            Self::SaleNotStarted => write!(f, "sale has not started"),
            Self::SaleEnded => write!(f, "sale has ended"),
            Self::BelowMinimum { minimum } => write!(f, "minimum purchase is {minimum}"),
            Self::AboveMaximum { maximum } => write!(f, "maximum purchase is {maximum}"),
            Self::Insufficient {
                requested,
                available: 0,
            } => write!(f, "sold out, {requested} requested"),
            Self::Insufficient {
                requested,
                available,
            } => write!(f, "only {available} left, {requested} requested"),
        }
    }
}

/// Point-in-time availability of a tier. Informational only: never use a
/// snapshot to gate a later write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierAvailability {
    pub tier_id: DbId,
    pub quota: Units,
    pub sold: Units,
    pub held: Units,
    pub available: Units,
}

impl TierAvailability {
    pub fn compute(tier: &TicketTier, held: Units) -> Self {
        Self {
            tier_id: tier.id,
            quota: tier.quota,
            sold: tier.sold,
            held,
            available: available_units(tier.quota, tier.sold, held),
        }
    }
}

/// `quota - sold - held`, floored at zero.
///
/// The floor only matters if an administrator forced the quota below the
/// committed total; the ledger refuses such changes.
pub fn available_units(quota: Units, sold: Units, held: Units) -> Units {
    quota.saturating_sub(sold).saturating_sub(held).max(0)
}

/// Decide whether `quantity` units of `tier` may be held right now.
///
/// `held` is the total quantity of the tier's holds that are active and not
/// past their deadline at `now`. Callers must compute it under the same lock
/// that will cover the hold insert.
pub fn evaluate_reservation(
    tier: &TicketTier,
    held: Units,
    quantity: Units,
    now: Timestamp,
) -> Result<(), DenialReason> {
    if !tier.is_active {
        return Err(DenialReason::TierInactive);
    }
    match tier.sale_window_state(now) {
        SaleWindowState::NotStarted => return Err(DenialReason::SaleNotStarted),
        SaleWindowState::Ended => return Err(DenialReason::SaleEnded),
        SaleWindowState::Open => {}
    }
    if quantity < tier.min_purchase {
        return Err(DenialReason::BelowMinimum {
            minimum: tier.min_purchase,
        });
    }
    if let Some(maximum) = tier.max_purchase {
        if quantity > maximum {
            return Err(DenialReason::AboveMaximum { maximum });
        }
    }

    let available = available_units(tier.quota, tier.sold, held);
    if available < quantity {
        return Err(DenialReason::Insufficient {
            requested: quantity,
            available,
        });
    }
    Ok(())
}

/// Smallest quota a tier may be set to without breaking
/// `sold + held <= quota`.
pub fn minimum_quota(tier: &TicketTier, held: Units) -> Units {
    tier.sold.saturating_add(held)
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    pub(crate) fn tier(quota: Units, sold: Units) -> TicketTier {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        TicketTier {
            id: 1,
            event_id: 10,
            name: "General Admission".into(),
            price: 4_500,
            currency: "EUR".into(),
            quota,
            sold,
            min_purchase: 1,
            max_purchase: None,
            sale_starts_at: None,
            sale_ends_at: None,
            is_active: true,
            created_at: created,
            updated_at: created,
        }
    }

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap()
    }

    #[test]
    fn available_subtracts_sold_and_held() {
        assert_eq!(available_units(5, 0, 0), 5);
        assert_eq!(available_units(5, 3, 0), 2);
        assert_eq!(available_units(5, 3, 2), 0);
    }

    #[test]
    fn available_never_goes_negative() {
        assert_eq!(available_units(2, 3, 1), 0);
    }

    #[test]
    fn grants_when_enough_units_remain() {
        assert_eq!(evaluate_reservation(&tier(5, 0), 0, 3, now()), Ok(()));
        assert_eq!(evaluate_reservation(&tier(5, 2), 1, 2, now()), Ok(()));
    }

    #[test]
    fn denies_when_held_units_exhaust_the_pool() {
        assert_eq!(
            evaluate_reservation(&tier(5, 0), 3, 3, now()),
            Err(DenialReason::Insufficient {
                requested: 3,
                available: 2
            })
        );
    }

    #[test]
    fn denies_inactive_tier_before_counting() {
        let mut t = tier(5, 0);
        t.is_active = false;
        assert_eq!(
            evaluate_reservation(&t, 0, 1, now()),
            Err(DenialReason::TierInactive)
        );
    }

    #[test]
    fn sale_window_is_half_open() {
        let mut t = tier(5, 0);
        t.sale_starts_at = Some(now());
        t.sale_ends_at = Some(now() + Duration::hours(1));

        assert_eq!(t.sale_window_state(now()), SaleWindowState::Open);
        assert_eq!(
            t.sale_window_state(now() - Duration::seconds(1)),
            SaleWindowState::NotStarted
        );
        assert_eq!(
            t.sale_window_state(now() + Duration::hours(1)),
            SaleWindowState::Ended
        );
    }

    #[test]
    fn denies_outside_sale_window() {
        let mut t = tier(5, 0);
        t.sale_starts_at = Some(now() + Duration::minutes(5));
        assert_eq!(
            evaluate_reservation(&t, 0, 1, now()),
            Err(DenialReason::SaleNotStarted)
        );

        t.sale_starts_at = None;
        t.sale_ends_at = Some(now());
        assert_eq!(
            evaluate_reservation(&t, 0, 1, now()),
            Err(DenialReason::SaleEnded)
        );
    }

    #[test]
    fn enforces_purchase_limits() {
        let mut t = tier(50, 0);
        t.min_purchase = 2;
        t.max_purchase = Some(4);
        assert_eq!(
            evaluate_reservation(&t, 0, 1, now()),
            Err(DenialReason::BelowMinimum { minimum: 2 })
        );
        assert_eq!(
            evaluate_reservation(&t, 0, 5, now()),
            Err(DenialReason::AboveMaximum { maximum: 4 })
        );
        assert_eq!(evaluate_reservation(&t, 0, 4, now()), Ok(()));
    }

    #[test]
    fn denial_messages_distinguish_sold_out() {
        let sold_out = DenialReason::Insufficient {
            requested: 1,
            available: 0,
        };
        assert_eq!(sold_out.to_string(), "sold out, 1 requested");
    }

    #[test]
    fn minimum_quota_covers_sold_and_held() {
        assert_eq!(minimum_quota(&tier(10, 4), 3), 7);
    }

    #[test]
    fn availability_snapshot() {
        let snapshot = TierAvailability::compute(&tier(5, 3), 1);
        assert_eq!(snapshot.available, 1);
        assert_eq!(snapshot.held, 1);
    }
}
