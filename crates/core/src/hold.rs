//! Inventory holds and the confirmation rules shared by every gateway.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::status::{HoldStatus, OrderStatus};
use crate::tier::TicketTier;
use crate::types::{DbId, Timestamp, Units};

/// A temporary claim on `quantity` units of one tier, bound to one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryHold {
    pub id: DbId,
    pub order_id: DbId,
    pub ticket_tier_id: DbId,
    pub quantity: Units,
    pub status: HoldStatus,
    pub expires_at: Timestamp,
    /// Total seconds granted through extensions so far.
    pub extended_secs: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl InventoryHold {
    /// Whether this hold counts against its tier's pool at `now`.
    pub fn is_counted(&self, now: Timestamp) -> bool {
        self.status.is_active() && self.expires_at > now
    }

    /// Active but past its deadline: the Reclaimer's target set.
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.status.is_active() && self.expires_at <= now
    }
}

/// Why a confirmation could not be applied. Every variant means the
/// inventory is lost and the buyer must restart checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConflictReason {
    OrderNotPaid { status: OrderStatus },
    NoHolds,
    HoldNotActive { hold_id: DbId, status: HoldStatus },
    HoldExpired { hold_id: DbId },
    QuotaExceeded { tier_id: DbId, quota: Units, sold: Units, quantity: Units },
    UnknownTier { tier_id: DbId },
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrderNotPaid { status } => write!(f, "order is {status}, not paid"),
            Self::NoHolds => write!(f, "order has no inventory holds"),
            Self::HoldNotActive { hold_id, status } => {
                write!(f, "hold {hold_id} is already {status}")
            }
            Self::HoldExpired { hold_id } => write!(f, "hold {hold_id} expired"),
            Self::QuotaExceeded {
                tier_id,
                quota,
                sold,
                quantity,
            } => write!(
                f,
                "tier {tier_id} cannot sell {quantity} more ({sold} of {quota} sold)"
            ),
            Self::UnknownTier { tier_id } => write!(f, "tier {tier_id} does not exist"),
        }
    }
}

/// Check a single hold against its tier before flipping it to confirmed.
///
/// Returns `Ok(false)` when the hold is already confirmed (nothing to do),
/// `Ok(true)` when it must be confirmed now.
pub fn check_confirmable(
    hold: &InventoryHold,
    tier: &TicketTier,
    now: Timestamp,
) -> Result<bool, ConflictReason> {
    match hold.status {
        HoldStatus::Confirmed => return Ok(false),
        HoldStatus::Released | HoldStatus::Expired => {
            return Err(ConflictReason::HoldNotActive {
                hold_id: hold.id,
                status: hold.status,
            })
        }
        HoldStatus::Active => {}
    }
    if hold.expires_at <= now {
        return Err(ConflictReason::HoldExpired { hold_id: hold.id });
    }
    if tier.sold + hold.quantity > tier.quota {
        return Err(ConflictReason::QuotaExceeded {
            tier_id: tier.id,
            quota: tier.quota,
            sold: tier.sold,
            quantity: hold.quantity,
        });
    }
    Ok(true)
}

/// A single hold may only be confirmed once its order has been paid.
pub fn check_order_paid(order_status: OrderStatus) -> Result<(), ConflictReason> {
    match order_status {
        OrderStatus::Paid | OrderStatus::Confirmed => Ok(()),
        status => Err(ConflictReason::OrderNotPaid { status }),
    }
}

/// The holds an order confirmation will flip and the `sold` increment each
/// tier receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmationPlan {
    pub hold_ids: Vec<DbId>,
    pub sold_increments: BTreeMap<DbId, Units>,
}

impl ConfirmationPlan {
    pub fn is_empty(&self) -> bool {
        self.hold_ids.is_empty()
    }
}

/// Plan an all-or-nothing confirmation of every hold of one order.
///
/// A `Paid` order must have at least one hold and every hold must be
/// confirmable; already-confirmed holds are skipped so a retry never counts
/// them twice. A `Confirmed` order yields an empty plan.
pub fn plan_order_confirmation(
    order_status: OrderStatus,
    holds: &[InventoryHold],
    tiers: &BTreeMap<DbId, TicketTier>,
    now: Timestamp,
) -> Result<ConfirmationPlan, ConflictReason> {
    match order_status {
        OrderStatus::Confirmed => return Ok(ConfirmationPlan::default()),
        OrderStatus::Paid => {}
        status => return Err(ConflictReason::OrderNotPaid { status }),
    }
    if holds.is_empty() {
        return Err(ConflictReason::NoHolds);
    }

    let mut plan = ConfirmationPlan::default();
    for hold in holds {
        let tier = tiers
            .get(&hold.ticket_tier_id)
            .ok_or(ConflictReason::UnknownTier {
                tier_id: hold.ticket_tier_id,
            })?;
        // Earlier holds of the same order may already claim part of the tier.
        let mut projected = tier.clone();
        projected.sold += plan
            .sold_increments
            .get(&tier.id)
            .copied()
            .unwrap_or_default();

        if check_confirmable(hold, &projected, now)? {
            plan.hold_ids.push(hold.id);
            *plan.sold_increments.entry(tier.id).or_default() += hold.quantity;
        }
    }
    Ok(plan)
}
