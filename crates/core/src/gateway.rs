//! Persistence gateway contract.
//!
//! Every capacity-changing method is a single atomic call against the store:
//! the availability check and the write it gates happen under one lock or
//! transaction. Callers never compose a read with a later write to decide
//! capacity.
//!
//! Implementations:
//!
//! - [`InMemoryGateway`](crate::memory::InMemoryGateway): single-process,
//!   mutex-guarded maps for tests and local development.
//! - `PgInventoryGateway` in `boxoffice_db`: row-locking transactions.

use async_trait::async_trait;
use serde::Serialize;

use crate::hold::{ConflictReason, InventoryHold};
use crate::order::{NewOrder, Order, OrderLine};
use crate::status::{HoldStatus, OrderStatus};
use crate::tier::{DenialReason, TicketTier, TierAvailability};
use crate::types::{DbId, Timestamp, Units};

/// Infrastructure-level failure reported by a gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// A uniqueness constraint rejected the write.
    #[error("duplicate value: {0}")]
    Duplicate(String),

    /// Stored data does not map onto the domain model.
    #[error("invalid stored data: {0}")]
    Invalid(String),

    /// The store is unreachable or timed out. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Parameters of one atomic check-and-reserve.
#[derive(Debug, Clone, Copy)]
pub struct ReserveRequest {
    pub order_id: DbId,
    pub tier_id: DbId,
    pub quantity: Units,
    pub expires_at: Timestamp,
    pub now: Timestamp,
}

/// Result of a check-and-reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveDecision {
    Granted(InventoryHold),
    Denied { reason: DenialReason, available: Units },
}

impl ReserveDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Result of confirming one hold or every hold of an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// All targeted holds are confirmed. `newly_confirmed` counts the holds
    /// flipped by this call; zero means a retry found everything done.
    Confirmed {
        holds: Vec<InventoryHold>,
        newly_confirmed: usize,
    },
    /// Nothing was changed.
    Conflict(ConflictReason),
}

/// Why a hold extension was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExtendRefusal {
    NotActive { status: HoldStatus },
    Expired,
    CapExceeded { extended_secs: i64, max_total_secs: i64 },
}

impl std::fmt::Display for ExtendRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotActive { status } => write!(f, "hold is {status}"),
            Self::Expired => write!(f, "hold already expired"),
            Self::CapExceeded {
                extended_secs,
                max_total_secs,
            } => write!(
                f,
                "hold already extended by {extended_secs}s of {max_total_secs}s allowed"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended(InventoryHold),
    Refused(ExtendRefusal),
}

/// Result of an explicit quota change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaOutcome {
    Adjusted(TicketTier),
    /// The new quota would drop below `sold + held`.
    Refused { minimum: Units },
}

/// Durable store for tiers, holds, orders and order lines.
#[async_trait]
pub trait InventoryGateway: Send + Sync {
    // -- Tiers --------------------------------------------------------------

    async fn find_tier(&self, tier_id: DbId) -> Result<Option<TicketTier>, GatewayError>;

    /// Availability snapshot counting holds active and unexpired at `now`.
    async fn tier_availability(
        &self,
        tier_id: DbId,
        now: Timestamp,
    ) -> Result<TierAvailability, GatewayError>;

    /// Atomically set a tier's quota, refusing values below `sold + held`.
    async fn adjust_quota(
        &self,
        tier_id: DbId,
        new_quota: Units,
        now: Timestamp,
    ) -> Result<QuotaOutcome, GatewayError>;

    // -- Holds --------------------------------------------------------------

    /// Check availability and insert the hold as one atomic unit.
    async fn reserve_if_available(
        &self,
        request: &ReserveRequest,
    ) -> Result<ReserveDecision, GatewayError>;

    /// Flip one active, unexpired hold to confirmed and add its quantity to
    /// the tier's `sold`, guarded by `sold + quantity <= quota`.
    async fn confirm_hold(
        &self,
        hold_id: DbId,
        now: Timestamp,
    ) -> Result<ConfirmOutcome, GatewayError>;

    /// Confirm every hold of a paid order and move the order to confirmed,
    /// all or nothing. Already-confirmed holds are skipped.
    async fn confirm_order_holds(
        &self,
        order_id: DbId,
        now: Timestamp,
    ) -> Result<ConfirmOutcome, GatewayError>;

    /// Active -> released. Returns `false` (no-op) for any other status.
    async fn release_hold(&self, hold_id: DbId, now: Timestamp) -> Result<bool, GatewayError>;

    /// Active and past deadline -> expired. Returns `false` (no-op) otherwise.
    async fn expire_hold(&self, hold_id: DbId, now: Timestamp) -> Result<bool, GatewayError>;

    /// Push an active, unexpired hold's deadline forward by `extra_secs`
    /// while its cumulative extension stays within `max_total_secs`.
    async fn extend_hold(
        &self,
        hold_id: DbId,
        extra_secs: i64,
        max_total_secs: i64,
        now: Timestamp,
    ) -> Result<ExtendOutcome, GatewayError>;

    async fn find_hold(&self, hold_id: DbId) -> Result<Option<InventoryHold>, GatewayError>;

    async fn holds_for_order(&self, order_id: DbId) -> Result<Vec<InventoryHold>, GatewayError>;

    /// Active holds whose deadline is at or before `now`, oldest first.
    async fn list_expired_active_holds(
        &self,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<InventoryHold>, GatewayError>;

    // -- Orders -------------------------------------------------------------

    /// Insert a pending order and its lines.
    async fn create_order(&self, order: &NewOrder) -> Result<Order, GatewayError>;

    async fn find_order(&self, order_id: DbId) -> Result<Option<Order>, GatewayError>;

    async fn order_lines(&self, order_id: DbId) -> Result<Vec<OrderLine>, GatewayError>;

    /// Move an order from `from` to `to` only if it is still in `from`.
    /// Returns `None` when another writer got there first.
    async fn transition_order(
        &self,
        order_id: DbId,
        from: OrderStatus,
        to: OrderStatus,
        now: Timestamp,
    ) -> Result<Option<Order>, GatewayError>;

    /// Pending orders past their deadline that no longer have an active
    /// hold (abandoned before or after their holds were swept).
    async fn list_expired_pending_orders(
        &self,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<Order>, GatewayError>;
}
