//! Order state machine.
//!
//! Drives an [`Order`] through the transition table in
//! [`order_transitions`](crate::status::order_transitions), invoking the
//! [`HoldManager`] at each step. Every transition is validated against the
//! table first and then applied as a conditional update keyed on the current
//! status, so a failed transition leaves the order where it was.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::ReservationConfig;
use crate::error::CoreError;
use crate::gateway::{GatewayError, InventoryGateway};
use crate::hold::InventoryHold;
use crate::hold_manager::HoldManager;
use crate::ledger::CapacityLedger;
use crate::order::{
    generate_order_code, generate_order_secret, price_lines, validate_checkout, CheckoutRequest,
    NewOrder, Order, OrderLine,
};
use crate::payment::{PaymentCallback, PaymentOutcome};
use crate::status::order_transitions::validate_transition;
use crate::status::OrderStatus;
use crate::types::DbId;

/// Attempts at finding an unused order code before giving up.
const MAX_CODE_ATTEMPTS: usize = 5;

/// A freshly started checkout: the pending order, its lines and its holds.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub order: Order,
    pub lines: Vec<OrderLine>,
    pub holds: Vec<InventoryHold>,
}

pub struct OrderStateMachine {
    gateway: Arc<dyn InventoryGateway>,
    ledger: Arc<CapacityLedger>,
    holds: HoldManager,
    clock: Arc<dyn Clock>,
    hold_ttl: chrono::Duration,
}

impl OrderStateMachine {
    /// Wire the ledger, hold manager and state machine over one gateway.
    pub fn new(
        gateway: Arc<dyn InventoryGateway>,
        clock: Arc<dyn Clock>,
        config: &ReservationConfig,
    ) -> Self {
        let ledger = Arc::new(CapacityLedger::new(Arc::clone(&gateway), Arc::clone(&clock)));
        let holds = HoldManager::new(
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            config.max_hold_extension,
        );
        Self {
            gateway,
            ledger,
            holds,
            clock,
            hold_ttl: config.hold_ttl,
        }
    }

    pub fn ledger(&self) -> &Arc<CapacityLedger> {
        &self.ledger
    }

    pub fn holds(&self) -> &HoldManager {
        &self.holds
    }

    pub fn gateway(&self) -> &Arc<dyn InventoryGateway> {
        &self.gateway
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn find_order(&self, order_id: DbId) -> Result<Order, CoreError> {
        self.gateway
            .find_order(order_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "order",
                id: order_id,
            })
    }

    /// Start a checkout: create a pending order with its lines, then hold
    /// inventory for every line.
    ///
    /// If any line cannot be held, holds already granted are released, the
    /// order is moved to `cancelled` and the capacity error is returned.
    pub async fn checkout(&self, request: &CheckoutRequest) -> Result<Checkout, CoreError> {
        validate_checkout(request)?;

        let mut tiers = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let tier = self
                .gateway
                .find_tier(line.tier_id)
                .await?
                .ok_or(CoreError::NotFound {
                    entity: "ticket_tier",
                    id: line.tier_id,
                })?;
            tiers.push(tier);
        }
        let (currency, total_amount, lines) = price_lines(&request.lines, &tiers)?;

        let now = self.clock.now();
        let expires_at = now.checked_add_signed(self.hold_ttl).ok_or_else(|| {
            CoreError::Validation(format!(
                "Hold TTL of {}s is out of range",
                self.hold_ttl.num_seconds()
            ))
        })?;
        let new_order = NewOrder {
            code: String::new(),
            secret: generate_order_secret(),
            email: request.email.trim().to_string(),
            customer_name: request.customer_name.clone(),
            currency,
            total_amount,
            expires_at,
            created_at: now,
            lines,
        };
        let order = self.create_order(new_order).await?;

        match self
            .holds
            .create_holds(order.id, &request.lines, self.hold_ttl)
            .await
        {
            Ok(holds) => {
                let lines = self.gateway.order_lines(order.id).await?;
                tracing::info!(
                    order_id = order.id,
                    code = %order.code,
                    holds = holds.len(),
                    total_amount = order.total_amount,
                    expires_at = %order.expires_at,
                    "Checkout started"
                );
                Ok(Checkout {
                    order,
                    lines,
                    holds,
                })
            }
            Err(e) => {
                self.abandon(&order).await;
                Err(e)
            }
        }
    }

    /// Insert the order, drawing a new code whenever one is already taken.
    async fn create_order(&self, mut new_order: NewOrder) -> Result<Order, CoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            new_order.code = generate_order_code();
            match self.gateway.create_order(&new_order).await {
                Err(GatewayError::Duplicate(msg)) if attempt < MAX_CODE_ATTEMPTS => {
                    tracing::debug!(attempt, error = %msg, "Order code collision, retrying");
                }
                result => return Ok(result?),
            }
        }
    }

    /// Close an order whose holds could not be granted.
    async fn abandon(&self, order: &Order) {
        let result = self
            .gateway
            .transition_order(
                order.id,
                OrderStatus::Pending,
                OrderStatus::Cancelled,
                self.clock.now(),
            )
            .await;
        if let Err(e) = result {
            tracing::error!(
                order_id = order.id,
                error = %e,
                "Failed to cancel order after reservation failure"
            );
        }
    }

    /// pending -> paid. No inventory effect, but refused with
    /// [`CoreError::Conflict`] if any hold has lapsed.
    pub async fn mark_paid(&self, order_id: DbId) -> Result<Order, CoreError> {
        let order = self.find_order(order_id).await?;
        validate_transition(order.status, OrderStatus::Paid)?;

        let now = self.clock.now();
        let holds = self.gateway.holds_for_order(order_id).await?;
        if holds.is_empty() {
            return Err(CoreError::Conflict(format!(
                "Order {} has no inventory held",
                order.code
            )));
        }
        if let Some(lapsed) = holds.iter().find(|h| !h.is_counted(now)) {
            return Err(CoreError::Conflict(format!(
                "Reservation for order {} expired (hold {} is {})",
                order.code,
                lapsed.id,
                if lapsed.status.is_active() {
                    "past its deadline"
                } else {
                    lapsed.status.as_str()
                }
            )));
        }

        self.apply(&order, OrderStatus::Paid).await
    }

    /// paid -> confirmed. Confirms every hold and increments `sold`
    /// atomically with the status change.
    pub async fn confirm(&self, order_id: DbId) -> Result<Order, CoreError> {
        let order = self.find_order(order_id).await?;
        validate_transition(order.status, OrderStatus::Confirmed)?;

        self.holds.confirm_holds(order_id).await?;

        let confirmed = self.find_order(order_id).await?;
        tracing::info!(
            order_id,
            code = %confirmed.code,
            from = %order.status,
            to = %confirmed.status,
            "Order transitioned"
        );
        Ok(confirmed)
    }

    /// Payment fully settled: pending -> paid (if needed) -> confirmed.
    pub async fn settle_payment(&self, order_id: DbId) -> Result<Order, CoreError> {
        let order = self.find_order(order_id).await?;
        if order.status == OrderStatus::Pending {
            self.mark_paid(order_id).await?;
        }
        self.confirm(order_id).await
    }

    /// Apply a payment provider notification.
    ///
    /// Success settles the order. Failure changes nothing: the order stays
    /// pending and its holds run until they expire, so the buyer may retry.
    /// A repeated success for a confirmed order returns it unchanged.
    pub async fn handle_payment_callback(
        &self,
        callback: PaymentCallback,
    ) -> Result<Order, CoreError> {
        let order = self.find_order(callback.order_id).await?;
        match callback.outcome {
            PaymentOutcome::Success if order.status == OrderStatus::Confirmed => {
                tracing::info!(
                    order_id = order.id,
                    code = %order.code,
                    "Duplicate payment success ignored"
                );
                Ok(order)
            }
            PaymentOutcome::Success => self.settle_payment(order.id).await,
            PaymentOutcome::Failure => {
                tracing::warn!(
                    order_id = order.id,
                    code = %order.code,
                    status = %order.status,
                    "Payment failed"
                );
                Ok(order)
            }
        }
    }

    /// pending/paid -> cancelled. Releases every active hold immediately;
    /// `sold` is never touched.
    pub async fn cancel(&self, order_id: DbId) -> Result<Order, CoreError> {
        let order = self.find_order(order_id).await?;
        let cancelled = self.apply(&order, OrderStatus::Cancelled).await?;
        self.release_after_close(&cancelled).await;
        Ok(cancelled)
    }

    /// pending -> expired. Used by the Reclaimer once no hold of the order
    /// is active any more.
    pub async fn expire(&self, order_id: DbId) -> Result<Order, CoreError> {
        let order = self.find_order(order_id).await?;
        let expired = self.apply(&order, OrderStatus::Expired).await?;
        self.release_after_close(&expired).await;
        Ok(expired)
    }

    /// confirmed -> refunded. Issued tickets stay issued, so neither `sold`
    /// nor `quota` changes.
    pub async fn refund(&self, order_id: DbId) -> Result<Order, CoreError> {
        let order = self.find_order(order_id).await?;
        self.apply(&order, OrderStatus::Refunded).await
    }

    /// Release whatever is still held by a closed order. The order's status
    /// is already final, so a failure here is logged rather than returned;
    /// the holds lapse at their deadline and the Reclaimer expires them.
    async fn release_after_close(&self, order: &Order) {
        if let Err(e) = self.holds.release_holds(order.id).await {
            tracing::error!(
                order_id = order.id,
                status = %order.status,
                error = %e,
                "Failed to release holds of closed order"
            );
        }
    }

    /// Validate against the transition table, then apply as a conditional
    /// update. Losing a race reports the status that won.
    async fn apply(&self, order: &Order, to: OrderStatus) -> Result<Order, CoreError> {
        validate_transition(order.status, to)?;

        let updated = self
            .gateway
            .transition_order(order.id, order.status, to, self.clock.now())
            .await?;
        match updated {
            Some(updated) => {
                tracing::info!(
                    order_id = order.id,
                    code = %order.code,
                    from = %order.status,
                    to = %to,
                    "Order transitioned"
                );
                Ok(updated)
            }
            None => {
                let current = self.find_order(order.id).await?;
                tracing::warn!(
                    order_id = order.id,
                    expected = %order.status,
                    actual = %current.status,
                    to = %to,
                    "Order changed concurrently"
                );
                Err(CoreError::IllegalTransition {
                    from: current.status,
                    to,
                })
            }
        }
    }
}
