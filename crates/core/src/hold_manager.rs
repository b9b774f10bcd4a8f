//! Hold manager: multi-line reservations for one checkout.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CoreError;
use crate::gateway::{InventoryGateway, ReserveDecision};
use crate::hold::InventoryHold;
use crate::ledger::CapacityLedger;
use crate::order::CheckoutLine;
use crate::types::{DbId, Units};

pub struct HoldManager {
    ledger: Arc<CapacityLedger>,
    gateway: Arc<dyn InventoryGateway>,
    max_extension: chrono::Duration,
}

impl HoldManager {
    pub fn new(
        ledger: Arc<CapacityLedger>,
        gateway: Arc<dyn InventoryGateway>,
        max_extension: chrono::Duration,
    ) -> Self {
        Self {
            ledger,
            gateway,
            max_extension,
        }
    }

    /// Reserve every requested line for `order_id`, or none of them.
    ///
    /// Lines for the same tier are merged. Tiers are reserved in ascending id
    /// order so concurrent checkouts lock tiers in a consistent sequence. On
    /// the first denial or failure every hold granted so far in this batch is
    /// released before the error is returned.
    pub async fn create_holds(
        &self,
        order_id: DbId,
        lines: &[CheckoutLine],
        ttl: chrono::Duration,
    ) -> Result<Vec<InventoryHold>, CoreError> {
        let merged = merge_lines(lines)?;

        let mut granted: Vec<InventoryHold> = Vec::with_capacity(merged.len());
        for (&tier_id, &quantity) in &merged {
            let result = self
                .ledger
                .try_reserve(order_id, tier_id, quantity, ttl)
                .await;

            let err = match result {
                Ok(ReserveDecision::Granted(hold)) => {
                    granted.push(hold);
                    continue;
                }
                Ok(ReserveDecision::Denied { reason, available }) => {
                    CoreError::InsufficientInventory {
                        tier_id,
                        requested: quantity,
                        available,
                        reason,
                    }
                }
                Err(e) => e,
            };

            self.roll_back(order_id, &granted).await;
            return Err(err);
        }
        Ok(granted)
    }

    /// Compensating release of holds granted earlier in a failed batch.
    ///
    /// A hold whose release fails stays active until its deadline, when the
    /// Reclaimer expires it; it stops counting against availability at that
    /// moment regardless.
    async fn roll_back(&self, order_id: DbId, granted: &[InventoryHold]) {
        if granted.is_empty() {
            return;
        }
        tracing::warn!(order_id, holds = granted.len(), "Rolling back partial reservation");
        for hold in granted {
            if let Err(e) = self.ledger.release(hold.id).await {
                tracing::error!(
                    order_id,
                    hold_id = hold.id,
                    error = %e,
                    "Failed to release hold during rollback"
                );
            }
        }
    }

    /// Keep a hold alive during a multi-step checkout. Only legal while the
    /// hold is active; cumulative extension is capped.
    pub async fn extend_hold(
        &self,
        hold_id: DbId,
        additional: chrono::Duration,
    ) -> Result<InventoryHold, CoreError> {
        self.ledger
            .extend(hold_id, additional, self.max_extension)
            .await
    }

    /// Extend every active hold of an order by the same amount.
    pub async fn extend_order_holds(
        &self,
        order_id: DbId,
        additional: chrono::Duration,
    ) -> Result<Vec<InventoryHold>, CoreError> {
        let holds = self.gateway.holds_for_order(order_id).await?;
        let mut extended = Vec::with_capacity(holds.len());
        for hold in holds.iter().filter(|h| h.status.is_active()) {
            extended.push(self.extend_hold(hold.id, additional).await?);
        }
        Ok(extended)
    }

    /// Confirm every hold of a paid order, all or nothing.
    ///
    /// If any hold is no longer active (for example the Reclaimer expired
    /// it) nothing is confirmed and [`CoreError::Conflict`] is returned: the
    /// inventory is lost and checkout must restart.
    pub async fn confirm_holds(&self, order_id: DbId) -> Result<Vec<InventoryHold>, CoreError> {
        self.ledger.confirm_order(order_id).await
    }

    /// Release every active hold of an order. Idempotent: holds already
    /// released, expired or confirmed are left untouched. Returns how many
    /// holds this call released.
    pub async fn release_holds(&self, order_id: DbId) -> Result<usize, CoreError> {
        let holds = self.gateway.holds_for_order(order_id).await?;
        let mut released = 0;
        for hold in holds.iter().filter(|h| h.status.is_active()) {
            if self.ledger.release(hold.id).await? {
                released += 1;
            }
        }
        if released > 0 {
            tracing::info!(order_id, released, "Order holds released");
        }
        Ok(released)
    }
}

/// Merge requested lines per tier, rejecting non-positive quantities.
fn merge_lines(lines: &[CheckoutLine]) -> Result<BTreeMap<DbId, Units>, CoreError> {
    if lines.is_empty() {
        return Err(CoreError::Validation(
            "At least one line is required to reserve inventory".into(),
        ));
    }
    let mut merged: BTreeMap<DbId, Units> = BTreeMap::new();
    for line in lines {
        if line.quantity <= 0 {
            return Err(CoreError::Validation(format!(
                "Quantity for tier {} must be positive, got {}",
                line.tier_id, line.quantity
            )));
        }
        let total = merged.entry(line.tier_id).or_default();
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            CoreError::Validation(format!("Quantity for tier {} overflows", line.tier_id))
        })?;
    }
    Ok(merged)
}
