//! Capacity ledger.
//!
//! The only component that calls the gateway's capacity-changing methods.
//! Nothing else reads or writes a tier's `sold` count.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::MAX_DURATION_SECS;
use crate::error::CoreError;
use crate::gateway::{
    ConfirmOutcome, ExtendOutcome, InventoryGateway, QuotaOutcome, ReserveDecision,
    ReserveRequest,
};
use crate::hold::InventoryHold;
use crate::tier::{TicketTier, TierAvailability};
use crate::types::{DbId, Units};

pub struct CapacityLedger {
    gateway: Arc<dyn InventoryGateway>,
    clock: Arc<dyn Clock>,
}

impl CapacityLedger {
    pub fn new(gateway: Arc<dyn InventoryGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }

    /// Try to hold `quantity` units of `tier_id` for `order_id` until
    /// `now + ttl`.
    ///
    /// `Denied` is an expected outcome, returned as `Ok`.
    pub async fn try_reserve(
        &self,
        order_id: DbId,
        tier_id: DbId,
        quantity: Units,
        ttl: chrono::Duration,
    ) -> Result<ReserveDecision, CoreError> {
        if quantity <= 0 {
            return Err(CoreError::Validation(format!(
                "Reservation quantity must be positive, got {quantity}"
            )));
        }
        if ttl <= chrono::Duration::zero() {
            return Err(CoreError::Validation("Hold TTL must be positive".into()));
        }

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            CoreError::Validation(format!("Hold TTL of {}s is out of range", ttl.num_seconds()))
        })?;
        let request = ReserveRequest {
            order_id,
            tier_id,
            quantity,
            expires_at,
            now,
        };
        let decision = self.gateway.reserve_if_available(&request).await?;

        match &decision {
            ReserveDecision::Granted(hold) => tracing::info!(
                hold_id = hold.id,
                order_id,
                tier_id,
                quantity,
                expires_at = %hold.expires_at,
                "Inventory hold granted"
            ),
            ReserveDecision::Denied { reason, available } => tracing::warn!(
                order_id,
                tier_id,
                quantity,
                available,
                %reason,
                "Inventory hold denied"
            ),
        }
        Ok(decision)
    }

    /// Confirm one hold, moving its quantity into the tier's `sold`.
    ///
    /// The parent order must already be paid (or confirmed); a hold of a
    /// pending order is refused with [`CoreError::Conflict`] so that order
    /// can never expire with units counted as sold. Confirming an
    /// already-confirmed hold succeeds without touching `sold`.
    pub async fn confirm(&self, hold_id: DbId) -> Result<InventoryHold, CoreError> {
        match self.gateway.confirm_hold(hold_id, self.clock.now()).await? {
            ConfirmOutcome::Confirmed {
                holds,
                newly_confirmed,
            } => {
                let hold = holds.into_iter().next().ok_or(CoreError::NotFound {
                    entity: "inventory_hold",
                    id: hold_id,
                })?;
                if newly_confirmed > 0 {
                    tracing::info!(
                        hold_id,
                        tier_id = hold.ticket_tier_id,
                        quantity = hold.quantity,
                        "Inventory hold confirmed"
                    );
                }
                Ok(hold)
            }
            ConfirmOutcome::Conflict(reason) => {
                tracing::warn!(hold_id, %reason, "Hold confirmation conflict");
                Err(CoreError::Conflict(reason.to_string()))
            }
        }
    }

    /// Confirm every hold of a paid order and mark the order confirmed, as a
    /// single atomic step. Safe to retry: a repeat returns the confirmed
    /// holds without counting them again.
    pub async fn confirm_order(&self, order_id: DbId) -> Result<Vec<InventoryHold>, CoreError> {
        match self
            .gateway
            .confirm_order_holds(order_id, self.clock.now())
            .await?
        {
            ConfirmOutcome::Confirmed {
                holds,
                newly_confirmed,
            } => {
                tracing::info!(
                    order_id,
                    holds = holds.len(),
                    newly_confirmed,
                    "Order holds confirmed"
                );
                Ok(holds)
            }
            ConfirmOutcome::Conflict(reason) => {
                tracing::warn!(order_id, %reason, "Order confirmation conflict");
                Err(CoreError::Conflict(reason.to_string()))
            }
        }
    }

    /// Return an active hold's units to the pool. A no-op (`false`) for any
    /// hold that is no longer active. Never changes `sold`.
    pub async fn release(&self, hold_id: DbId) -> Result<bool, CoreError> {
        let released = self.gateway.release_hold(hold_id, self.clock.now()).await?;
        if released {
            tracing::info!(hold_id, "Inventory hold released");
        } else {
            tracing::debug!(hold_id, "Release skipped: hold not active");
        }
        Ok(released)
    }

    /// Mark an overdue active hold as expired. A no-op (`false`) if the hold
    /// was confirmed, released, expired or extended in the meantime.
    pub async fn expire(&self, hold_id: DbId) -> Result<bool, CoreError> {
        let expired = self.gateway.expire_hold(hold_id, self.clock.now()).await?;
        if expired {
            tracing::info!(hold_id, "Inventory hold expired");
        }
        Ok(expired)
    }

    /// Push an active hold's deadline forward, bounded by `max_total`
    /// cumulative extension.
    ///
    /// Extensions are whole seconds: anything under one second is refused,
    /// and a partial trailing second is rounded up.
    pub async fn extend(
        &self,
        hold_id: DbId,
        additional: chrono::Duration,
        max_total: chrono::Duration,
    ) -> Result<InventoryHold, CoreError> {
        if additional < chrono::Duration::seconds(1) {
            return Err(CoreError::Validation(format!(
                "Hold extension must be at least one second, got {}ms",
                additional.num_milliseconds()
            )));
        }
        let additional_secs = whole_seconds_rounded_up(additional);
        if additional_secs > MAX_DURATION_SECS || max_total.num_seconds() > MAX_DURATION_SECS {
            return Err(CoreError::Validation(format!(
                "Hold extension must not exceed {MAX_DURATION_SECS}s"
            )));
        }
        let outcome = self
            .gateway
            .extend_hold(
                hold_id,
                additional_secs,
                max_total.num_seconds(),
                self.clock.now(),
            )
            .await?;

        match outcome {
            ExtendOutcome::Extended(hold) => {
                tracing::info!(
                    hold_id,
                    expires_at = %hold.expires_at,
                    extended_secs = hold.extended_secs,
                    "Inventory hold extended"
                );
                Ok(hold)
            }
            ExtendOutcome::Refused(refusal) => {
                tracing::warn!(hold_id, %refusal, "Hold extension refused");
                Err(CoreError::Conflict(format!(
                    "Cannot extend hold {hold_id}: {refusal}"
                )))
            }
        }
    }

    /// Current availability of a tier, for display.
    pub async fn availability(&self, tier_id: DbId) -> Result<TierAvailability, CoreError> {
        Ok(self
            .gateway
            .tier_availability(tier_id, self.clock.now())
            .await?)
    }

    /// Explicitly change a tier's capacity. Refused when the new quota would
    /// fall below what is already sold or held.
    pub async fn adjust_quota(
        &self,
        tier_id: DbId,
        new_quota: Units,
    ) -> Result<TicketTier, CoreError> {
        if new_quota < 0 {
            return Err(CoreError::Validation(format!(
                "Quota must not be negative, got {new_quota}"
            )));
        }
        match self
            .gateway
            .adjust_quota(tier_id, new_quota, self.clock.now())
            .await?
        {
            QuotaOutcome::Adjusted(tier) => {
                tracing::info!(
                    tier_id,
                    quota = tier.quota,
                    sold = tier.sold,
                    "Tier quota adjusted"
                );
                Ok(tier)
            }
            QuotaOutcome::Refused { minimum } => Err(CoreError::Conflict(format!(
                "Quota {new_quota} for tier {tier_id} is below the {minimum} units \
                 already sold or held"
            ))),
        }
    }
}

fn whole_seconds_rounded_up(duration: chrono::Duration) -> i64 {
    let secs = duration.num_seconds();
    if duration > chrono::Duration::seconds(secs) {
        secs + 1
    } else {
        secs
    }
}
