#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use boxoffice_core::clock::{Clock, ManualClock};
use boxoffice_core::config::ReservationConfig;
use boxoffice_core::gateway::InventoryGateway;
use boxoffice_core::hold::InventoryHold;
use boxoffice_core::memory::InMemoryGateway;
use boxoffice_core::order::{CheckoutLine, CheckoutRequest};
use boxoffice_core::order_machine::OrderStateMachine;
use boxoffice_core::reclaimer::ExpiryReclaimer;
use boxoffice_core::tier::{TicketTier, TierAvailability};
use boxoffice_core::types::{DbId, Timestamp, Units};

/// Fixed starting point for every test clock.
pub fn start() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap()
}

/// An on-sale tier with no limits beyond `quota`. The gateway assigns the id.
pub fn new_tier(quota: Units) -> TicketTier {
    TicketTier {
        id: 0,
        event_id: 1,
        name: "General Admission".to_string(),
        price: 2_500,
        currency: "EUR".to_string(),
        quota,
        sold: 0,
        min_purchase: 1,
        max_purchase: None,
        sale_starts_at: None,
        sale_ends_at: None,
        is_active: true,
        created_at: start(),
        updated_at: start(),
    }
}

pub fn request(lines: &[(DbId, Units)]) -> CheckoutRequest {
    CheckoutRequest {
        email: "buyer@example.com".to_string(),
        customer_name: Some("Test Buyer".to_string()),
        lines: lines
            .iter()
            .map(|&(tier_id, quantity)| CheckoutLine { tier_id, quantity })
            .collect(),
    }
}

/// In-memory gateway, manual clock and the services wired over them.
pub struct Harness {
    pub gateway: Arc<InMemoryGateway>,
    pub clock: Arc<ManualClock>,
    pub config: ReservationConfig,
    pub orders: Arc<OrderStateMachine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReservationConfig::default())
    }

    pub fn with_config(config: ReservationConfig) -> Self {
        let gateway = Arc::new(InMemoryGateway::new());
        let clock = Arc::new(ManualClock::new(start()));
        let orders = Arc::new(OrderStateMachine::new(
            Arc::clone(&gateway) as Arc<dyn InventoryGateway>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            &config,
        ));
        Self {
            gateway,
            clock,
            config,
            orders,
        }
    }

    pub fn add_tier(&self, quota: Units) -> DbId {
        self.gateway.insert_tier(new_tier(quota)).unwrap().id
    }

    pub fn reclaimer(&self) -> ExpiryReclaimer {
        ExpiryReclaimer::new(Arc::clone(&self.orders), &self.config)
    }

    pub async fn holds_of(&self, order_id: DbId) -> Vec<InventoryHold> {
        self.gateway.holds_for_order(order_id).await.unwrap()
    }

    pub async fn availability(&self, tier_id: DbId) -> TierAvailability {
        self.orders.ledger().availability(tier_id).await.unwrap()
    }

    pub async fn available(&self, tier_id: DbId) -> Units {
        self.availability(tier_id).await.available
    }

    pub async fn sold(&self, tier_id: DbId) -> Units {
        self.availability(tier_id).await.sold
    }

    /// `sold + active unexpired holds <= quota` must hold at every point.
    pub async fn assert_within_quota(&self, tier_id: DbId) {
        let a = self.availability(tier_id).await;
        assert!(
            a.sold + a.held <= a.quota,
            "tier {tier_id} oversold: sold {} + held {} > quota {}",
            a.sold,
            a.held,
            a.quota
        );
    }
}
