use crate::gateway::GatewayError;
use crate::status::OrderStatus;
use crate::tier::DenialReason;
use crate::types::{DbId, Units};

/// Domain error for every inventory and order operation.
///
/// Capacity denials, lost races and infrastructure failures are kept in
/// separate variants so callers can tell "only 2 left" apart from "your
/// reservation expired" apart from "try again".
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient inventory for tier {tier_id}: {reason}")]
    InsufficientInventory {
        tier_id: DbId,
        requested: Units,
        available: Units,
        reason: DenialReason,
    },

    /// The inventory backing this operation is gone (hold expired, released
    /// or already confirmed elsewhere). Restart the checkout.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Illegal order transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    /// The persistence gateway could not be reached. Safe to retry.
    #[error("Persistence unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Unavailable(_))
    }

    /// Whether the caller should restart checkout instead of retrying.
    pub fn is_inventory_lost(&self) -> bool {
        matches!(self, CoreError::Conflict(_))
    }
}

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { entity, id } => CoreError::NotFound { entity, id },
            GatewayError::Duplicate(msg) => CoreError::Conflict(msg),
            GatewayError::Invalid(msg) => CoreError::Internal(msg),
            GatewayError::Unavailable(msg) => CoreError::Unavailable(msg),
        }
    }
}
