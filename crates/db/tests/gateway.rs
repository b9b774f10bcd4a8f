//! Integration tests for the PostgreSQL inventory gateway.
//!
//! Exercises `PgInventoryGateway` against a real database:
//! - Check-and-reserve grants and denials
//! - Concurrent reservations never exceeding the pool
//! - Single-hold and whole-order confirmation
//! - Release, expiry and extension guards
//! - Conditional order transitions
//! - Reclaimer listings (overdue holds, orphaned pending orders)
//! - The order state machine wired over Postgres end to end

use std::sync::Arc;

use assert_matches::assert_matches;
use boxoffice_core::clock::{Clock, ManualClock};
use boxoffice_core::config::ReservationConfig;
use boxoffice_core::gateway::{
    ConfirmOutcome, ExtendOutcome, ExtendRefusal, GatewayError, InventoryGateway, QuotaOutcome,
    ReserveDecision, ReserveRequest,
};
use boxoffice_core::hold::{ConflictReason, InventoryHold};
use boxoffice_core::order::{CheckoutLine, CheckoutRequest, NewOrder, NewOrderLine, Order};
use boxoffice_core::order_machine::OrderStateMachine;
use boxoffice_core::reclaimer::ExpiryReclaimer;
use boxoffice_core::status::{HoldStatus, OrderStatus};
use boxoffice_core::tier::{DenialReason, TicketTier};
use boxoffice_core::types::{DbId, Timestamp, Units};
use boxoffice_db::models::tier::CreateTicketTier;
use boxoffice_db::PgInventoryGateway;
use chrono::{Duration, TimeZone, Utc};
use futures::future::join_all;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn start() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap()
}

fn new_tier(quota: Units) -> CreateTicketTier {
    CreateTicketTier {
        event_id: 1,
        name: "General Admission".to_string(),
        price: 2_500,
        currency: "EUR".to_string(),
        quota,
        min_purchase: 1,
        max_purchase: None,
        sale_starts_at: None,
        sale_ends_at: None,
        is_active: true,
    }
}

async fn seed_tier(gateway: &PgInventoryGateway, quota: Units) -> TicketTier {
    gateway.insert_tier(&new_tier(quota), start()).await.unwrap()
}

async fn seed_order(gateway: &PgInventoryGateway, code: &str, lines: &[(DbId, Units)]) -> Order {
    gateway
        .create_order(&NewOrder {
            code: code.to_string(),
            secret: "s".repeat(32),
            email: "buyer@example.com".to_string(),
            customer_name: None,
            currency: "EUR".to_string(),
            total_amount: lines.iter().map(|&(_, q)| i64::from(q) * 2_500).sum(),
            expires_at: start() + Duration::minutes(15),
            created_at: start(),
            lines: lines
                .iter()
                .map(|&(ticket_tier_id, quantity)| NewOrderLine {
                    ticket_tier_id,
                    quantity,
                    unit_price: 2_500,
                })
                .collect(),
        })
        .await
        .unwrap()
}

async fn mark_paid(gateway: &PgInventoryGateway, order_id: DbId) {
    gateway
        .transition_order(order_id, OrderStatus::Pending, OrderStatus::Paid, start())
        .await
        .unwrap()
        .unwrap();
}

fn reserve(order_id: DbId, tier_id: DbId, quantity: Units) -> ReserveRequest {
    ReserveRequest {
        order_id,
        tier_id,
        quantity,
        expires_at: start() + Duration::minutes(15),
        now: start(),
    }
}

async fn hold(
    gateway: &PgInventoryGateway,
    order_id: DbId,
    tier_id: DbId,
    qty: Units,
) -> InventoryHold {
    match gateway
        .reserve_if_available(&reserve(order_id, tier_id, qty))
        .await
        .unwrap()
    {
        ReserveDecision::Granted(hold) => hold,
        denied => panic!("expected a granted hold, got {denied:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: check-and-reserve
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_reserve_grants_then_denies(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let first = seed_order(&gateway, "FIRST1", &[(tier.id, 3)]).await;
    let second = seed_order(&gateway, "SECND2", &[(tier.id, 3)]).await;

    let granted = hold(&gateway, first.id, tier.id, 3).await;
    assert_eq!(granted.status, HoldStatus::Active);
    assert_eq!(granted.quantity, 3);
    assert_eq!(granted.extended_secs, 0);

    let denied = gateway
        .reserve_if_available(&reserve(second.id, tier.id, 3))
        .await
        .unwrap();
    assert_eq!(
        denied,
        ReserveDecision::Denied {
            reason: DenialReason::Insufficient {
                requested: 3,
                available: 2
            },
            available: 2,
        }
    );

    let availability = gateway.tier_availability(tier.id, start()).await.unwrap();
    assert_eq!(availability.held, 3);
    assert_eq!(availability.available, 2);
    assert_eq!(gateway.holds_for_order(second.id).await.unwrap(), vec![]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_reserve_unknown_tier_or_order(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "KNOWN1", &[]).await;

    let err = gateway
        .reserve_if_available(&reserve(order.id, 999_999, 1))
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::NotFound { entity: "ticket_tier", .. });

    let err = gateway
        .reserve_if_available(&reserve(999_999, tier.id, 1))
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::NotFound { entity: "order", .. });
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_reserve_denied_on_inactive_tier(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "INACT1", &[]).await;
    gateway.set_tier_active(tier.id, false, start()).await.unwrap();

    let decision = gateway
        .reserve_if_available(&reserve(order.id, tier.id, 1))
        .await
        .unwrap();
    assert_matches!(
        decision,
        ReserveDecision::Denied {
            reason: DenialReason::TierInactive,
            ..
        }
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_lapsed_holds_do_not_count(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 2).await;
    let order = seed_order(&gateway, "LAPSE1", &[]).await;
    hold(&gateway, order.id, tier.id, 2).await;

    // Still active in storage, but past its deadline.
    let later = start() + Duration::minutes(15);
    let availability = gateway.tier_availability(tier.id, later).await.unwrap();
    assert_eq!(availability.held, 0);
    assert_eq!(availability.available, 2);

    let next = seed_order(&gateway, "LAPSE2", &[]).await;
    let decision = gateway
        .reserve_if_available(&ReserveRequest {
            now: later,
            expires_at: later + Duration::minutes(15),
            ..reserve(next.id, tier.id, 2)
        })
        .await
        .unwrap();
    assert!(decision.is_granted());
}

// ---------------------------------------------------------------------------
// Test: concurrent reservations
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_reservations_never_oversell(pool: PgPool) {
    let gateway = Arc::new(PgInventoryGateway::new(pool));
    let tier = seed_tier(&gateway, 7).await;

    let mut order_ids = Vec::new();
    for i in 0..20 {
        order_ids.push(seed_order(&gateway, &format!("RACE{i:02}"), &[]).await.id);
    }

    let attempts = order_ids.iter().map(|&order_id| {
        let gateway = Arc::clone(&gateway);
        async move { gateway.reserve_if_available(&reserve(order_id, tier.id, 1)).await }
    });
    let results = join_all(attempts).await;

    let granted = results
        .iter()
        .filter(|r| matches!(r, Ok(ReserveDecision::Granted(_))))
        .count();
    assert_eq!(granted, 7);
    assert!(results.iter().all(|r| r.is_ok()));

    let availability = gateway.tier_availability(tier.id, start()).await.unwrap();
    assert_eq!(availability.held, 7);
    assert_eq!(availability.available, 0);
}

// ---------------------------------------------------------------------------
// Test: confirmation
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_confirm_hold_moves_units_to_sold_once(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "CONF01", &[(tier.id, 2)]).await;
    let held = hold(&gateway, order.id, tier.id, 2).await;
    mark_paid(&gateway, order.id).await;

    let now = start() + Duration::minutes(1);
    let outcome = gateway.confirm_hold(held.id, now).await.unwrap();
    assert_matches!(
        outcome,
        ConfirmOutcome::Confirmed { ref holds, newly_confirmed: 1 }
            if holds[0].status == HoldStatus::Confirmed
    );

    let again = gateway.confirm_hold(held.id, now).await.unwrap();
    assert_matches!(again, ConfirmOutcome::Confirmed { newly_confirmed: 0, .. });

    let availability = gateway.tier_availability(tier.id, now).await.unwrap();
    assert_eq!(availability.sold, 2);
    assert_eq!(availability.held, 0);
    assert_eq!(availability.available, 3);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_confirm_hold_after_deadline_conflicts(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "LATE01", &[(tier.id, 1)]).await;
    let held = hold(&gateway, order.id, tier.id, 1).await;
    mark_paid(&gateway, order.id).await;

    let outcome = gateway
        .confirm_hold(held.id, start() + Duration::minutes(15))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ConfirmOutcome::Conflict(ConflictReason::HoldExpired { hold_id: held.id })
    );
    assert_eq!(gateway.find_tier(tier.id).await.unwrap().unwrap().sold, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_confirm_hold_of_pending_order_conflicts(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "UNPAID", &[(tier.id, 2)]).await;
    let held = hold(&gateway, order.id, tier.id, 2).await;

    let outcome = gateway.confirm_hold(held.id, start()).await.unwrap();
    assert_eq!(
        outcome,
        ConfirmOutcome::Conflict(ConflictReason::OrderNotPaid {
            status: OrderStatus::Pending
        })
    );

    let unchanged = gateway.find_hold(held.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, HoldStatus::Active);
    assert_eq!(gateway.find_tier(tier.id).await.unwrap().unwrap().sold, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_confirm_order_holds_is_all_or_nothing(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let general = seed_tier(&gateway, 5).await;
    let vip = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "ALLNO1", &[(general.id, 2), (vip.id, 1)]).await;
    hold(&gateway, order.id, general.id, 2).await;
    let vip_hold = hold(&gateway, order.id, vip.id, 1).await;

    // Not paid yet.
    let outcome = gateway.confirm_order_holds(order.id, start()).await.unwrap();
    assert_eq!(
        outcome,
        ConfirmOutcome::Conflict(ConflictReason::OrderNotPaid {
            status: OrderStatus::Pending
        })
    );

    gateway
        .transition_order(order.id, OrderStatus::Pending, OrderStatus::Paid, start())
        .await
        .unwrap()
        .unwrap();
    assert!(gateway.release_hold(vip_hold.id, start()).await.unwrap());

    let outcome = gateway.confirm_order_holds(order.id, start()).await.unwrap();
    assert_eq!(
        outcome,
        ConfirmOutcome::Conflict(ConflictReason::HoldNotActive {
            hold_id: vip_hold.id,
            status: HoldStatus::Released
        })
    );

    // Nothing was applied: the general hold is still active and unsold.
    let holds = gateway.holds_for_order(order.id).await.unwrap();
    assert_eq!(holds[0].status, HoldStatus::Active);
    assert_eq!(gateway.find_tier(general.id).await.unwrap().unwrap().sold, 0);
    let order = gateway.find_order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_confirm_order_holds_flips_order(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let general = seed_tier(&gateway, 5).await;
    let vip = seed_tier(&gateway, 2).await;
    let order = seed_order(&gateway, "FLIP01", &[(general.id, 3), (vip.id, 2)]).await;
    hold(&gateway, order.id, general.id, 3).await;
    hold(&gateway, order.id, vip.id, 2).await;
    gateway
        .transition_order(order.id, OrderStatus::Pending, OrderStatus::Paid, start())
        .await
        .unwrap();

    let now = start() + Duration::minutes(2);
    let outcome = gateway.confirm_order_holds(order.id, now).await.unwrap();
    assert_matches!(outcome, ConfirmOutcome::Confirmed { newly_confirmed: 2, .. });

    let order = gateway.find_order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.confirmed_at, Some(now));
    assert_eq!(gateway.find_tier(general.id).await.unwrap().unwrap().sold, 3);
    assert_eq!(gateway.find_tier(vip.id).await.unwrap().unwrap().sold, 2);

    // A retry on the confirmed order counts nothing twice.
    let retry = gateway.confirm_order_holds(order.id, now).await.unwrap();
    assert_matches!(retry, ConfirmOutcome::Confirmed { newly_confirmed: 0, .. });
    assert_eq!(gateway.find_tier(general.id).await.unwrap().unwrap().sold, 3);
}

// ---------------------------------------------------------------------------
// Test: release, expiry, extension
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_release_and_expire_are_conditional(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "COND01", &[]).await;
    let released = hold(&gateway, order.id, tier.id, 1).await;
    let lapsing = hold(&gateway, order.id, tier.id, 1).await;

    assert!(gateway.release_hold(released.id, start()).await.unwrap());
    assert!(!gateway.release_hold(released.id, start()).await.unwrap());
    assert!(!gateway.expire_hold(released.id, start() + Duration::hours(1)).await.unwrap());

    // Not overdue yet.
    assert!(!gateway.expire_hold(lapsing.id, start()).await.unwrap());
    let deadline = start() + Duration::minutes(15);
    assert!(gateway.expire_hold(lapsing.id, deadline).await.unwrap());
    assert!(!gateway.expire_hold(lapsing.id, deadline).await.unwrap());

    let released = gateway.find_hold(released.id).await.unwrap().unwrap();
    assert_eq!(released.status, HoldStatus::Released);
    let lapsed = gateway.find_hold(lapsing.id).await.unwrap().unwrap();
    assert_eq!(lapsed.status, HoldStatus::Expired);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_extend_hold_guards(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "EXTND1", &[]).await;
    let held = hold(&gateway, order.id, tier.id, 1).await;

    let outcome = gateway.extend_hold(held.id, 300, 600, start()).await.unwrap();
    let extended = match outcome {
        ExtendOutcome::Extended(hold) => hold,
        refused => panic!("expected extension, got {refused:?}"),
    };
    assert_eq!(extended.expires_at, held.expires_at + Duration::seconds(300));
    assert_eq!(extended.extended_secs, 300);

    let outcome = gateway.extend_hold(held.id, 400, 600, start()).await.unwrap();
    assert_eq!(
        outcome,
        ExtendOutcome::Refused(ExtendRefusal::CapExceeded {
            extended_secs: 300,
            max_total_secs: 600
        })
    );

    let outcome = gateway
        .extend_hold(held.id, 60, 600, extended.expires_at)
        .await
        .unwrap();
    assert_eq!(outcome, ExtendOutcome::Refused(ExtendRefusal::Expired));

    gateway.release_hold(held.id, start()).await.unwrap();
    let outcome = gateway.extend_hold(held.id, 60, 600, start()).await.unwrap();
    assert_eq!(
        outcome,
        ExtendOutcome::Refused(ExtendRefusal::NotActive {
            status: HoldStatus::Released
        })
    );

    let err = gateway.extend_hold(999_999, 60, 600, start()).await.unwrap_err();
    assert_matches!(err, GatewayError::NotFound { entity: "inventory_hold", .. });
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_extend_hold_overflow_is_invalid(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let order = seed_order(&gateway, "EXTOVF", &[]).await;
    let held = hold(&gateway, order.id, tier.id, 1).await;
    gateway.extend_hold(held.id, 300, 600, start()).await.unwrap();

    let err = gateway
        .extend_hold(held.id, i64::MAX - 100, i64::MAX, start())
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Invalid(_));

    let unchanged = gateway.find_hold(held.id).await.unwrap().unwrap();
    assert_eq!(unchanged.extended_secs, 300);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_adjust_quota_respects_commitments(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 10).await;
    let order = seed_order(&gateway, "QUOTA1", &[]).await;
    hold(&gateway, order.id, tier.id, 4).await;

    let outcome = gateway.adjust_quota(tier.id, 3, start()).await.unwrap();
    assert_eq!(outcome, QuotaOutcome::Refused { minimum: 4 });

    let outcome = gateway.adjust_quota(tier.id, 4, start()).await.unwrap();
    assert_matches!(outcome, QuotaOutcome::Adjusted(ref t) if t.quota == 4);
}

// ---------------------------------------------------------------------------
// Test: order transitions and duplicate codes
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_transition_is_conditional_on_current_status(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let order = seed_order(&gateway, "TRANS1", &[]).await;
    let now = start() + Duration::minutes(3);

    let cancelled = gateway
        .transition_order(order.id, OrderStatus::Pending, OrderStatus::Cancelled, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.closed_at, Some(now));

    // The order moved on; a second writer expecting Pending loses.
    let lost = gateway
        .transition_order(order.id, OrderStatus::Pending, OrderStatus::Expired, now)
        .await
        .unwrap();
    assert_eq!(lost, None);

    let err = gateway
        .transition_order(999_999, OrderStatus::Pending, OrderStatus::Paid, now)
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::NotFound { entity: "order", .. });
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_duplicate_order_code_rejected(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 5).await;
    let first = seed_order(&gateway, "DUPE01", &[(tier.id, 1)]).await;

    let err = gateway
        .create_order(&NewOrder {
            code: first.code.clone(),
            secret: "t".repeat(32),
            email: "other@example.com".to_string(),
            customer_name: None,
            currency: "EUR".to_string(),
            total_amount: 0,
            expires_at: start(),
            created_at: start(),
            lines: vec![],
        })
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Duplicate(_));

    let lines = gateway.order_lines(first.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 1);
    assert_eq!(lines[0].unit_price, 2_500);
}

// ---------------------------------------------------------------------------
// Test: reclaimer listings
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_listings_for_reclaimer(pool: PgPool) {
    let gateway = PgInventoryGateway::new(pool);
    let tier = seed_tier(&gateway, 10).await;
    let with_hold = seed_order(&gateway, "LIST01", &[]).await;
    let orphan = seed_order(&gateway, "LIST02", &[]).await;
    let overdue = hold(&gateway, with_hold.id, tier.id, 1).await;

    let before = start() + Duration::minutes(14);
    assert!(gateway.list_expired_active_holds(before, 10).await.unwrap().is_empty());
    assert!(gateway.list_expired_pending_orders(before, 10).await.unwrap().is_empty());

    let after = start() + Duration::minutes(15);
    let holds = gateway.list_expired_active_holds(after, 10).await.unwrap();
    assert_eq!(holds.iter().map(|h| h.id).collect::<Vec<_>>(), vec![overdue.id]);

    // The order with a still-active hold row is left for the hold pass.
    let orders = gateway.list_expired_pending_orders(after, 10).await.unwrap();
    assert_eq!(orders.iter().map(|o| o.id).collect::<Vec<_>>(), vec![orphan.id]);
}

// ---------------------------------------------------------------------------
// Test: end to end over Postgres
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_checkout_pay_and_reclaim(pool: PgPool) {
    let gateway = Arc::new(PgInventoryGateway::new(pool));
    let tier = seed_tier(&gateway, 4).await;
    let clock = Arc::new(ManualClock::new(start()));
    let config = ReservationConfig::default();
    let orders = Arc::new(OrderStateMachine::new(
        Arc::clone(&gateway) as Arc<dyn InventoryGateway>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        &config,
    ));
    let request = |quantity| CheckoutRequest {
        email: "buyer@example.com".to_string(),
        customer_name: None,
        lines: vec![CheckoutLine {
            tier_id: tier.id,
            quantity,
        }],
    };

    let paid = orders.checkout(&request(2)).await.unwrap();
    let abandoned = orders.checkout(&request(2)).await.unwrap();
    assert!(orders.checkout(&request(1)).await.is_err());

    let confirmed = orders.settle_payment(paid.order.id).await.unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);

    clock.advance(config.hold_ttl + Duration::seconds(1));
    let report = ExpiryReclaimer::new(Arc::clone(&orders), &config)
        .sweep()
        .await
        .unwrap();
    assert_eq!(report.holds_expired, 1);
    assert_eq!(report.orders_expired, 1);

    let abandoned = orders.find_order(abandoned.order.id).await.unwrap();
    assert_eq!(abandoned.status, OrderStatus::Expired);

    let availability = gateway.tier_availability(tier.id, clock.now()).await.unwrap();
    assert_eq!(availability.sold, 2);
    assert_eq!(availability.held, 0);
    assert_eq!(availability.available, 2);
}
