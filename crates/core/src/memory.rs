//! In-memory gateway implementation for testing and local development.
//!
//! Every method takes one mutex over the whole store, which makes each call
//! trivially atomic. That is exactly the property the Postgres gateway gets
//! from row locks, so service-level behaviour is identical.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no persistence, no cross-process
//!   coordination.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::gateway::{
    ConfirmOutcome, ExtendOutcome, ExtendRefusal, GatewayError, InventoryGateway, QuotaOutcome,
    ReserveDecision, ReserveRequest,
};
use crate::hold::{check_confirmable, check_order_paid, plan_order_confirmation, InventoryHold};
use crate::order::{NewOrder, Order, OrderLine};
use crate::status::{HoldStatus, OrderStatus};
use crate::tier::{
    available_units, evaluate_reservation, minimum_quota, TicketTier, TierAvailability,
};
use crate::types::{DbId, Timestamp, Units};

#[derive(Debug, Default)]
struct Store {
    tiers: HashMap<DbId, TicketTier>,
    holds: BTreeMap<DbId, InventoryHold>,
    orders: HashMap<DbId, Order>,
    lines: Vec<OrderLine>,
    next_id: DbId,
}

impl Store {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn tier(&self, tier_id: DbId) -> Result<&TicketTier, GatewayError> {
        self.tiers.get(&tier_id).ok_or(GatewayError::NotFound {
            entity: "ticket_tier",
            id: tier_id,
        })
    }

    fn held(&self, tier_id: DbId, now: Timestamp) -> Units {
        self.holds
            .values()
            .filter(|h| h.ticket_tier_id == tier_id && h.is_counted(now))
            .map(|h| h.quantity)
            .sum()
    }

    fn order_holds(&self, order_id: DbId) -> Vec<InventoryHold> {
        self.holds
            .values()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Flip holds to confirmed and bump `sold`. Callers have already checked
    /// every hold with [`check_confirmable`].
    fn apply_confirmation(
        &mut self,
        hold_ids: &[DbId],
        sold_increments: &BTreeMap<DbId, Units>,
        now: Timestamp,
    ) {
        for (tier_id, quantity) in sold_increments {
            if let Some(tier) = self.tiers.get_mut(tier_id) {
                tier.sold += quantity;
                tier.updated_at = now;
            }
        }
        for hold_id in hold_ids {
            if let Some(hold) = self.holds.get_mut(hold_id) {
                hold.status = HoldStatus::Confirmed;
                hold.updated_at = now;
            }
        }
    }
}

/// Converts a lock poison error to a gateway error.
fn poison_err<T>(_: PoisonError<T>) -> GatewayError {
    GatewayError::Unavailable("in-memory store lock poisoned".into())
}

/// Mutex-guarded, single-process implementation of [`InventoryGateway`].
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    store: Mutex<Store>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Store>, GatewayError> {
        self.store.lock().map_err(poison_err)
    }

    /// Insert a tier, assigning it a fresh id. Stands in for the organizer
    /// CRUD layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert_tier(&self, mut tier: TicketTier) -> Result<TicketTier, GatewayError> {
        let mut store = self.lock()?;
        tier.id = store.next_id();
        store.tiers.insert(tier.id, tier.clone());
        Ok(tier)
    }

    /// Set a tier's active flag. Stands in for the organizer CRUD layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the tier does not exist or the lock is poisoned.
    pub fn set_tier_active(&self, tier_id: DbId, is_active: bool) -> Result<(), GatewayError> {
        let mut store = self.lock()?;
        let tier = store.tiers.get_mut(&tier_id).ok_or(GatewayError::NotFound {
            entity: "ticket_tier",
            id: tier_id,
        })?;
        tier.is_active = is_active;
        Ok(())
    }
}

#[async_trait]
impl InventoryGateway for InMemoryGateway {
    async fn find_tier(&self, tier_id: DbId) -> Result<Option<TicketTier>, GatewayError> {
        Ok(self.lock()?.tiers.get(&tier_id).cloned())
    }

    async fn tier_availability(
        &self,
        tier_id: DbId,
        now: Timestamp,
    ) -> Result<TierAvailability, GatewayError> {
        let store = self.lock()?;
        let tier = store.tier(tier_id)?;
        Ok(TierAvailability::compute(tier, store.held(tier_id, now)))
    }

    async fn adjust_quota(
        &self,
        tier_id: DbId,
        new_quota: Units,
        now: Timestamp,
    ) -> Result<QuotaOutcome, GatewayError> {
        let mut store = self.lock()?;
        let held = store.held(tier_id, now);
        let minimum = minimum_quota(store.tier(tier_id)?, held);
        if new_quota < minimum {
            return Ok(QuotaOutcome::Refused { minimum });
        }

        let tier = store.tiers.get_mut(&tier_id).ok_or(GatewayError::NotFound {
            entity: "ticket_tier",
            id: tier_id,
        })?;
        tier.quota = new_quota;
        tier.updated_at = now;
        Ok(QuotaOutcome::Adjusted(tier.clone()))
    }

    async fn reserve_if_available(
        &self,
        request: &ReserveRequest,
    ) -> Result<ReserveDecision, GatewayError> {
        let mut store = self.lock()?;
        if !store.orders.contains_key(&request.order_id) {
            return Err(GatewayError::NotFound {
                entity: "order",
                id: request.order_id,
            });
        }
        let held = store.held(request.tier_id, request.now);
        let tier = store.tier(request.tier_id)?;

        if let Err(reason) = evaluate_reservation(tier, held, request.quantity, request.now) {
            return Ok(ReserveDecision::Denied {
                reason,
                available: available_units(tier.quota, tier.sold, held),
            });
        }

        let hold = InventoryHold {
            id: store.next_id(),
            order_id: request.order_id,
            ticket_tier_id: request.tier_id,
            quantity: request.quantity,
            status: HoldStatus::Active,
            expires_at: request.expires_at,
            extended_secs: 0,
            created_at: request.now,
            updated_at: request.now,
        };
        store.holds.insert(hold.id, hold.clone());
        Ok(ReserveDecision::Granted(hold))
    }

    async fn confirm_hold(
        &self,
        hold_id: DbId,
        now: Timestamp,
    ) -> Result<ConfirmOutcome, GatewayError> {
        let mut store = self.lock()?;
        let hold = store.holds.get(&hold_id).cloned().ok_or(GatewayError::NotFound {
            entity: "inventory_hold",
            id: hold_id,
        })?;
        let order_status = store
            .orders
            .get(&hold.order_id)
            .map(|o| o.status)
            .ok_or(GatewayError::NotFound {
                entity: "order",
                id: hold.order_id,
            })?;
        if let Err(reason) = check_order_paid(order_status) {
            return Ok(ConfirmOutcome::Conflict(reason));
        }
        let tier = store.tier(hold.ticket_tier_id)?;

        match check_confirmable(&hold, tier, now) {
            Err(reason) => Ok(ConfirmOutcome::Conflict(reason)),
            Ok(false) => Ok(ConfirmOutcome::Confirmed {
                holds: vec![hold],
                newly_confirmed: 0,
            }),
            Ok(true) => {
                let increments = BTreeMap::from([(hold.ticket_tier_id, hold.quantity)]);
                store.apply_confirmation(&[hold_id], &increments, now);
                let confirmed = store.holds.get(&hold_id).cloned().into_iter().collect();
                Ok(ConfirmOutcome::Confirmed {
                    holds: confirmed,
                    newly_confirmed: 1,
                })
            }
        }
    }

    async fn confirm_order_holds(
        &self,
        order_id: DbId,
        now: Timestamp,
    ) -> Result<ConfirmOutcome, GatewayError> {
        let mut store = self.lock()?;
        let status = store
            .orders
            .get(&order_id)
            .map(|o| o.status)
            .ok_or(GatewayError::NotFound {
                entity: "order",
                id: order_id,
            })?;
        let holds = store.order_holds(order_id);
        let tiers: BTreeMap<DbId, TicketTier> = holds
            .iter()
            .filter_map(|h| store.tiers.get(&h.ticket_tier_id))
            .map(|t| (t.id, t.clone()))
            .collect();

        let plan = match plan_order_confirmation(status, &holds, &tiers, now) {
            Ok(plan) => plan,
            Err(reason) => return Ok(ConfirmOutcome::Conflict(reason)),
        };

        store.apply_confirmation(&plan.hold_ids, &plan.sold_increments, now);
        if let Some(order) = store.orders.get_mut(&order_id) {
            if order.status == OrderStatus::Paid {
                order.status = OrderStatus::Confirmed;
                order.confirmed_at = Some(now);
                order.updated_at = now;
            }
        }
        Ok(ConfirmOutcome::Confirmed {
            holds: store.order_holds(order_id),
            newly_confirmed: plan.hold_ids.len(),
        })
    }

    async fn release_hold(&self, hold_id: DbId, now: Timestamp) -> Result<bool, GatewayError> {
        let mut store = self.lock()?;
        match store.holds.get_mut(&hold_id) {
            Some(hold) if hold.status.is_active() => {
                hold.status = HoldStatus::Released;
                hold.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_hold(&self, hold_id: DbId, now: Timestamp) -> Result<bool, GatewayError> {
        let mut store = self.lock()?;
        match store.holds.get_mut(&hold_id) {
            Some(hold) if hold.is_overdue(now) => {
                hold.status = HoldStatus::Expired;
                hold.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_hold(
        &self,
        hold_id: DbId,
        extra_secs: i64,
        max_total_secs: i64,
        now: Timestamp,
    ) -> Result<ExtendOutcome, GatewayError> {
        let mut store = self.lock()?;
        let hold = store.holds.get_mut(&hold_id).ok_or(GatewayError::NotFound {
            entity: "inventory_hold",
            id: hold_id,
        })?;

        if !hold.status.is_active() {
            return Ok(ExtendOutcome::Refused(ExtendRefusal::NotActive {
                status: hold.status,
            }));
        }
        if hold.expires_at <= now {
            return Ok(ExtendOutcome::Refused(ExtendRefusal::Expired));
        }
        let extended_secs = match hold.extended_secs.checked_add(extra_secs) {
            Some(total) if total <= max_total_secs => total,
            _ => {
                return Ok(ExtendOutcome::Refused(ExtendRefusal::CapExceeded {
                    extended_secs: hold.extended_secs,
                    max_total_secs,
                }))
            }
        };
        let expires_at = chrono::Duration::try_seconds(extra_secs)
            .and_then(|extra| hold.expires_at.checked_add_signed(extra))
            .ok_or_else(|| {
                GatewayError::Invalid(format!(
                    "Extending hold {hold_id} by {extra_secs}s overflows"
                ))
            })?;

        hold.expires_at = expires_at;
        hold.extended_secs = extended_secs;
        hold.updated_at = now;
        Ok(ExtendOutcome::Extended(hold.clone()))
    }

    async fn find_hold(&self, hold_id: DbId) -> Result<Option<InventoryHold>, GatewayError> {
        Ok(self.lock()?.holds.get(&hold_id).cloned())
    }

    async fn holds_for_order(&self, order_id: DbId) -> Result<Vec<InventoryHold>, GatewayError> {
        Ok(self.lock()?.order_holds(order_id))
    }

    async fn list_expired_active_holds(
        &self,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<InventoryHold>, GatewayError> {
        let store = self.lock()?;
        let mut overdue: Vec<InventoryHold> = store
            .holds
            .values()
            .filter(|h| h.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|h| (h.expires_at, h.id));
        overdue.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(overdue)
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, GatewayError> {
        let mut store = self.lock()?;
        if store.orders.values().any(|o| o.code == order.code) {
            return Err(GatewayError::Duplicate(format!(
                "order code {} already exists",
                order.code
            )));
        }

        let created = Order {
            id: store.next_id(),
            code: order.code.clone(),
            secret: order.secret.clone(),
            status: OrderStatus::Pending,
            email: order.email.clone(),
            customer_name: order.customer_name.clone(),
            total_amount: order.total_amount,
            currency: order.currency.clone(),
            expires_at: order.expires_at,
            paid_at: None,
            confirmed_at: None,
            closed_at: None,
            created_at: order.created_at,
            updated_at: order.created_at,
        };
        for line in &order.lines {
            let id = store.next_id();
            store.lines.push(OrderLine {
                id,
                order_id: created.id,
                ticket_tier_id: line.ticket_tier_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                created_at: order.created_at,
            });
        }
        store.orders.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_order(&self, order_id: DbId) -> Result<Option<Order>, GatewayError> {
        Ok(self.lock()?.orders.get(&order_id).cloned())
    }

    async fn order_lines(&self, order_id: DbId) -> Result<Vec<OrderLine>, GatewayError> {
        Ok(self
            .lock()?
            .lines
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn transition_order(
        &self,
        order_id: DbId,
        from: OrderStatus,
        to: OrderStatus,
        now: Timestamp,
    ) -> Result<Option<Order>, GatewayError> {
        let mut store = self.lock()?;
        let Some(order) = store.orders.get_mut(&order_id) else {
            return Err(GatewayError::NotFound {
                entity: "order",
                id: order_id,
            });
        };
        if order.status != from {
            return Ok(None);
        }

        order.status = to;
        order.updated_at = now;
        match to {
            OrderStatus::Paid => order.paid_at = Some(now),
            OrderStatus::Confirmed => order.confirmed_at = Some(now),
            OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Refunded => {
                order.closed_at = Some(now)
            }
            OrderStatus::Pending => {}
        }
        Ok(Some(order.clone()))
    }

    async fn list_expired_pending_orders(
        &self,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<Order>, GatewayError> {
        let store = self.lock()?;
        let mut orders: Vec<Order> = store
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.expires_at <= now)
            .filter(|o| {
                !store
                    .holds
                    .values()
                    .any(|h| h.order_id == o.id && h.status.is_active())
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.expires_at, o.id));
        orders.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(orders)
    }
}
