//! Orders, order lines and checkout request validation.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::status::OrderStatus;
use crate::tier::TicketTier;
use crate::types::{DbId, MinorUnits, Timestamp, Units};

/// Length of the externally shown order code.
pub const ORDER_CODE_LENGTH: usize = 5;

/// Length of the guest-access secret.
pub const ORDER_SECRET_LENGTH: usize = 32;

/// Order codes avoid characters that are easy to misread (0/O, 1/I/L).
const ORDER_CODE_CHARSET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Maximum number of distinct lines in one checkout.
pub const MAX_CHECKOUT_LINES: usize = 20;

/// Maximum length of a customer email address.
pub const MAX_EMAIL_LENGTH: usize = 254;

/// A purchase attempt aggregating one or more order lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: DbId,
    pub code: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub status: OrderStatus,
    pub email: String,
    pub customer_name: Option<String>,
    pub total_amount: MinorUnits,
    pub currency: String,
    pub expires_at: Timestamp,
    pub paid_at: Option<Timestamp>,
    pub confirmed_at: Option<Timestamp>,
    /// Set when the order reaches expired, cancelled or refunded.
    pub closed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Billing record of `(order, tier, quantity, unit_price)`. Not used for
/// inventory accounting; holds are authoritative for capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: DbId,
    pub order_id: DbId,
    pub ticket_tier_id: DbId,
    pub quantity: Units,
    pub unit_price: MinorUnits,
    pub created_at: Timestamp,
}

/// Insert payload for a new pending order and its lines.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub code: String,
    pub secret: String,
    pub email: String,
    pub customer_name: Option<String>,
    pub currency: String,
    pub total_amount: MinorUnits,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub ticket_tier_id: DbId,
    pub quantity: Units,
    pub unit_price: MinorUnits,
}

/// One requested `(tier, quantity)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub tier_id: DbId,
    pub quantity: Units,
}

/// A buyer's request to start checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub email: String,
    pub customer_name: Option<String>,
    pub lines: Vec<CheckoutLine>,
}

/// Validate the shape of a checkout request before touching inventory.
pub fn validate_checkout(request: &CheckoutRequest) -> Result<(), CoreError> {
    let email = request.email.trim();
    if email.is_empty() {
        return Err(CoreError::Validation("Email must not be empty".into()));
    }
    if email.len() > MAX_EMAIL_LENGTH {
        return Err(CoreError::Validation(format!(
            "Email must be at most {MAX_EMAIL_LENGTH} characters"
        )));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => {
            return Err(CoreError::Validation(format!(
                "Invalid email address '{email}'"
            )))
        }
    }

    if request.lines.is_empty() {
        return Err(CoreError::Validation(
            "Checkout must contain at least one line".into(),
        ));
    }
    if request.lines.len() > MAX_CHECKOUT_LINES {
        return Err(CoreError::Validation(format!(
            "Checkout may contain at most {MAX_CHECKOUT_LINES} lines"
        )));
    }
    for (i, line) in request.lines.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(CoreError::Validation(format!(
                "Line {i}: quantity must be positive, got {}",
                line.quantity
            )));
        }
    }
    Ok(())
}

/// Price each requested line from its tier and total the order.
///
/// `tiers` is index-aligned with `lines`. All tiers must share one currency.
pub fn price_lines(
    lines: &[CheckoutLine],
    tiers: &[TicketTier],
) -> Result<(String, MinorUnits, Vec<NewOrderLine>), CoreError> {
    let Some(first) = tiers.first() else {
        return Err(CoreError::Validation(
            "Checkout must contain at least one line".into(),
        ));
    };
    let currency = first.currency.clone();

    let mut total: MinorUnits = 0;
    let mut priced = Vec::with_capacity(lines.len());
    for (line, tier) in lines.iter().zip(tiers) {
        if tier.currency != currency {
            return Err(CoreError::Validation(format!(
                "Tier {} is priced in {}, but the order is in {currency}",
                tier.id, tier.currency
            )));
        }
        let amount = tier
            .price
            .checked_mul(MinorUnits::from(line.quantity))
            .and_then(|amount| total.checked_add(amount))
            .ok_or_else(|| CoreError::Validation("Order total overflows".into()))?;
        total = amount;
        priced.push(NewOrderLine {
            ticket_tier_id: tier.id,
            quantity: line.quantity,
            unit_price: tier.price,
        });
    }
    Ok((currency, total, priced))
}

/// Generate a short, human-friendly order code.
pub fn generate_order_code() -> String {
    let mut rng = rand::rng();
    (0..ORDER_CODE_LENGTH)
        .map(|_| char::from(ORDER_CODE_CHARSET[rng.random_range(0..ORDER_CODE_CHARSET.len())]))
        .collect()
}

/// Generate the guest-access secret shown only in the confirmation link.
pub fn generate_order_secret() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(ORDER_SECRET_LENGTH)
        .map(char::from)
        .collect()
}
