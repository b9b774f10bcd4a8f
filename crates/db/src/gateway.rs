//! PostgreSQL implementation of the inventory gateway.
//!
//! Capacity decisions run inside a transaction that holds the tier row lock
//! (`FOR NO KEY UPDATE`) from the availability read until commit, so two
//! reservations for the same tier are strictly serialized. Lock order is
//! always order row, then holds by id, then tiers by id.

use std::collections::BTreeMap;

use async_trait::async_trait;
use boxoffice_core::gateway::{
    ConfirmOutcome, ExtendOutcome, ExtendRefusal, GatewayError, InventoryGateway, QuotaOutcome,
    ReserveDecision, ReserveRequest,
};
use boxoffice_core::hold::{
    check_confirmable, check_order_paid, plan_order_confirmation, ConflictReason, InventoryHold,
};
use boxoffice_core::order::{NewOrder, Order, OrderLine};
use boxoffice_core::status::OrderStatus;
use boxoffice_core::tier::{
    available_units, evaluate_reservation, minimum_quota, TicketTier, TierAvailability,
};
use boxoffice_core::types::{DbId, Timestamp, Units};

use crate::error::classify_sqlx_error;
use crate::models::hold::into_holds;
use crate::models::tier::CreateTicketTier;
use crate::repositories::{HoldRepo, OrderRepo, TicketTierRepo};
use crate::DbPool;

/// Inventory gateway backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgInventoryGateway {
    pool: DbPool,
}

fn tier_not_found(id: DbId) -> GatewayError {
    GatewayError::NotFound {
        entity: "ticket_tier",
        id,
    }
}

fn hold_not_found(id: DbId) -> GatewayError {
    GatewayError::NotFound {
        entity: "inventory_hold",
        id,
    }
}

fn order_not_found(id: DbId) -> GatewayError {
    GatewayError::NotFound {
        entity: "order",
        id,
    }
}

impl PgInventoryGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Insert a tier. Stands in for the organizer CRUD layer when seeding.
    pub async fn insert_tier(
        &self,
        input: &CreateTicketTier,
        now: Timestamp,
    ) -> Result<TicketTier, GatewayError> {
        let row = TicketTierRepo::create(&self.pool, input, now)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(row.into())
    }

    /// Take a tier on or off sale.
    pub async fn set_tier_active(
        &self,
        tier_id: DbId,
        is_active: bool,
        now: Timestamp,
    ) -> Result<(), GatewayError> {
        let updated = TicketTierRepo::set_active(&self.pool, tier_id, is_active, now)
            .await
            .map_err(classify_sqlx_error)?;
        if !updated {
            return Err(tier_not_found(tier_id));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryGateway for PgInventoryGateway {
    async fn find_tier(&self, tier_id: DbId) -> Result<Option<TicketTier>, GatewayError> {
        let row = TicketTierRepo::find_by_id(&self.pool, tier_id)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn tier_availability(
        &self,
        tier_id: DbId,
        now: Timestamp,
    ) -> Result<TierAvailability, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
        let tier: TicketTier = TicketTierRepo::find_by_id(&mut *tx, tier_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| tier_not_found(tier_id))?
            .into();
        let held = HoldRepo::held_units(&mut *tx, tier_id, now)
            .await
            .map_err(classify_sqlx_error)?;
        tx.commit().await.map_err(classify_sqlx_error)?;

        Ok(TierAvailability::compute(&tier, held))
    }

    async fn adjust_quota(
        &self,
        tier_id: DbId,
        new_quota: Units,
        now: Timestamp,
    ) -> Result<QuotaOutcome, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
        let tier: TicketTier = TicketTierRepo::find_for_update(&mut *tx, tier_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| tier_not_found(tier_id))?
            .into();
        let held = HoldRepo::held_units(&mut *tx, tier_id, now)
            .await
            .map_err(classify_sqlx_error)?;

        let minimum = minimum_quota(&tier, held);
        if new_quota < minimum {
            return Ok(QuotaOutcome::Refused { minimum });
        }

        let updated = TicketTierRepo::set_quota(&mut *tx, tier_id, new_quota, now)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| tier_not_found(tier_id))?;
        tx.commit().await.map_err(classify_sqlx_error)?;

        Ok(QuotaOutcome::Adjusted(updated.into()))
    }

    async fn reserve_if_available(
        &self,
        request: &ReserveRequest,
    ) -> Result<ReserveDecision, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;

        let tier: TicketTier = TicketTierRepo::find_for_update(&mut *tx, request.tier_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| tier_not_found(request.tier_id))?
            .into();
        if OrderRepo::find_by_id(&mut *tx, request.order_id)
            .await
            .map_err(classify_sqlx_error)?
            .is_none()
        {
            return Err(order_not_found(request.order_id));
        }
        let held = HoldRepo::held_units(&mut *tx, request.tier_id, request.now)
            .await
            .map_err(classify_sqlx_error)?;

        if let Err(reason) = evaluate_reservation(&tier, held, request.quantity, request.now) {
            // Dropping the transaction rolls it back and releases the lock.
            return Ok(ReserveDecision::Denied {
                reason,
                available: available_units(tier.quota, tier.sold, held),
            });
        }

        let row = HoldRepo::create(&mut *tx, request)
            .await
            .map_err(classify_sqlx_error)?;
        tx.commit().await.map_err(classify_sqlx_error)?;

        Ok(ReserveDecision::Granted(InventoryHold::try_from(row)?))
    }

    async fn confirm_hold(
        &self,
        hold_id: DbId,
        now: Timestamp,
    ) -> Result<ConfirmOutcome, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;

        // A hold never changes order, so the unlocked read only serves to
        // take the order lock ahead of the hold lock.
        let order_id = HoldRepo::find_by_id(&mut *tx, hold_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| hold_not_found(hold_id))?
            .order_id;
        let order = OrderRepo::find_for_update(&mut *tx, order_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| order_not_found(order_id))
            .and_then(Order::try_from)?;
        if let Err(reason) = check_order_paid(order.status) {
            return Ok(ConfirmOutcome::Conflict(reason));
        }

        let hold = HoldRepo::find_for_update(&mut *tx, hold_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| hold_not_found(hold_id))
            .and_then(InventoryHold::try_from)?;
        let tier: TicketTier = TicketTierRepo::find_for_update(&mut *tx, hold.ticket_tier_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| tier_not_found(hold.ticket_tier_id))?
            .into();

        match check_confirmable(&hold, &tier, now) {
            Err(reason) => return Ok(ConfirmOutcome::Conflict(reason)),
            Ok(false) => {
                return Ok(ConfirmOutcome::Confirmed {
                    holds: vec![hold],
                    newly_confirmed: 0,
                })
            }
            Ok(true) => {}
        }

        let sold = TicketTierRepo::add_sold(&mut *tx, tier.id, hold.quantity, now)
            .await
            .map_err(classify_sqlx_error)?;
        if sold.is_none() {
            return Ok(ConfirmOutcome::Conflict(ConflictReason::QuotaExceeded {
                tier_id: tier.id,
                quota: tier.quota,
                sold: tier.sold,
                quantity: hold.quantity,
            }));
        }
        HoldRepo::mark_confirmed(&mut *tx, &[hold_id], now)
            .await
            .map_err(classify_sqlx_error)?;
        let confirmed = HoldRepo::find_by_id(&mut *tx, hold_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| hold_not_found(hold_id))
            .and_then(InventoryHold::try_from)?;
        tx.commit().await.map_err(classify_sqlx_error)?;

        Ok(ConfirmOutcome::Confirmed {
            holds: vec![confirmed],
            newly_confirmed: 1,
        })
    }

    async fn confirm_order_holds(
        &self,
        order_id: DbId,
        now: Timestamp,
    ) -> Result<ConfirmOutcome, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;

        let order = OrderRepo::find_for_update(&mut *tx, order_id)
            .await
            .map_err(classify_sqlx_error)?
            .ok_or_else(|| order_not_found(order_id))
            .and_then(Order::try_from)?;
        let holds = into_holds(
            HoldRepo::lock_by_order(&mut *tx, order_id)
                .await
                .map_err(classify_sqlx_error)?,
        )?;

        let mut tier_ids: Vec<DbId> = holds.iter().map(|h| h.ticket_tier_id).collect();
        tier_ids.sort_unstable();
        tier_ids.dedup();
        let tiers: BTreeMap<DbId, TicketTier> = TicketTierRepo::lock_many(&mut *tx, &tier_ids)
            .await
            .map_err(classify_sqlx_error)?
            .into_iter()
            .map(|row| (row.id, TicketTier::from(row)))
            .collect();

        let plan = match plan_order_confirmation(order.status, &holds, &tiers, now) {
            Ok(plan) => plan,
            Err(reason) => return Ok(ConfirmOutcome::Conflict(reason)),
        };

        for (&tier_id, &quantity) in &plan.sold_increments {
            let updated = TicketTierRepo::add_sold(&mut *tx, tier_id, quantity, now)
                .await
                .map_err(classify_sqlx_error)?;
            if updated.is_none() {
                let tier = tiers.get(&tier_id).ok_or_else(|| tier_not_found(tier_id))?;
                return Ok(ConfirmOutcome::Conflict(ConflictReason::QuotaExceeded {
                    tier_id,
                    quota: tier.quota,
                    sold: tier.sold,
                    quantity,
                }));
            }
        }
        HoldRepo::mark_confirmed(&mut *tx, &plan.hold_ids, now)
            .await
            .map_err(classify_sqlx_error)?;
        if order.status == OrderStatus::Paid {
            OrderRepo::transition(
                &mut *tx,
                order_id,
                OrderStatus::Paid,
                OrderStatus::Confirmed,
                now,
            )
            .await
            .map_err(classify_sqlx_error)?;
        }
        let holds = into_holds(
            HoldRepo::list_by_order(&mut *tx, order_id)
                .await
                .map_err(classify_sqlx_error)?,
        )?;
        tx.commit().await.map_err(classify_sqlx_error)?;

        Ok(ConfirmOutcome::Confirmed {
            holds,
            newly_confirmed: plan.hold_ids.len(),
        })
    }

    async fn release_hold(&self, hold_id: DbId, now: Timestamp) -> Result<bool, GatewayError> {
        HoldRepo::release(&self.pool, hold_id, now)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn expire_hold(&self, hold_id: DbId, now: Timestamp) -> Result<bool, GatewayError> {
        HoldRepo::expire(&self.pool, hold_id, now)
            .await
            .map_err(classify_sqlx_error)
    }

    async fn extend_hold(
        &self,
        hold_id: DbId,
        extra_secs: i64,
        max_total_secs: i64,
        now: Timestamp,
    ) -> Result<ExtendOutcome, GatewayError> {
        let extended = HoldRepo::extend(&self.pool, hold_id, extra_secs, max_total_secs, now)
            .await
            .map_err(classify_sqlx_error)?;
        if let Some(row) = extended {
            return Ok(ExtendOutcome::Extended(InventoryHold::try_from(row)?));
        }

        // Refused: read back the hold to say which guard failed.
        let hold = self
            .find_hold(hold_id)
            .await?
            .ok_or_else(|| hold_not_found(hold_id))?;
        let refusal = if !hold.status.is_active() {
            ExtendRefusal::NotActive {
                status: hold.status,
            }
        } else if hold.expires_at <= now {
            ExtendRefusal::Expired
        } else {
            ExtendRefusal::CapExceeded {
                extended_secs: hold.extended_secs,
                max_total_secs,
            }
        };
        Ok(ExtendOutcome::Refused(refusal))
    }

    async fn find_hold(&self, hold_id: DbId) -> Result<Option<InventoryHold>, GatewayError> {
        HoldRepo::find_by_id(&self.pool, hold_id)
            .await
            .map_err(classify_sqlx_error)?
            .map(InventoryHold::try_from)
            .transpose()
    }

    async fn holds_for_order(&self, order_id: DbId) -> Result<Vec<InventoryHold>, GatewayError> {
        into_holds(
            HoldRepo::list_by_order(&self.pool, order_id)
                .await
                .map_err(classify_sqlx_error)?,
        )
    }

    async fn list_expired_active_holds(
        &self,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<InventoryHold>, GatewayError> {
        into_holds(
            HoldRepo::list_overdue(&self.pool, now, limit)
                .await
                .map_err(classify_sqlx_error)?,
        )
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;
        let row = OrderRepo::create(&mut *tx, order)
            .await
            .map_err(classify_sqlx_error)?;
        for line in &order.lines {
            OrderRepo::create_line(&mut *tx, row.id, line, order.created_at)
                .await
                .map_err(classify_sqlx_error)?;
        }
        tx.commit().await.map_err(classify_sqlx_error)?;

        Order::try_from(row)
    }

    async fn find_order(&self, order_id: DbId) -> Result<Option<Order>, GatewayError> {
        OrderRepo::find_by_id(&self.pool, order_id)
            .await
            .map_err(classify_sqlx_error)?
            .map(Order::try_from)
            .transpose()
    }

    async fn order_lines(&self, order_id: DbId) -> Result<Vec<OrderLine>, GatewayError> {
        let rows = OrderRepo::list_lines(&self.pool, order_id)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn transition_order(
        &self,
        order_id: DbId,
        from: OrderStatus,
        to: OrderStatus,
        now: Timestamp,
    ) -> Result<Option<Order>, GatewayError> {
        let updated = OrderRepo::transition(&self.pool, order_id, from, to, now)
            .await
            .map_err(classify_sqlx_error)?;
        match updated {
            Some(row) => Ok(Some(Order::try_from(row)?)),
            None => {
                // Distinguish "moved by someone else" from "never existed".
                if self.find_order(order_id).await?.is_none() {
                    return Err(order_not_found(order_id));
                }
                Ok(None)
            }
        }
    }

    async fn list_expired_pending_orders(
        &self,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<Order>, GatewayError> {
        OrderRepo::list_expired_pending(&self.pool, now, limit)
            .await
            .map_err(classify_sqlx_error)?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }
}
