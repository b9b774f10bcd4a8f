//! Payment callback boundary.
//!
//! The payment provider is external; it only tells us how an attempt ended.

use serde::{Deserialize, Serialize};

use crate::types::DbId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success,
    Failure,
}

/// One provider notification about an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub order_id: DbId,
    pub outcome: PaymentOutcome,
}
