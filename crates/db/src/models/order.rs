use boxoffice_core::gateway::GatewayError;
use boxoffice_core::order::{Order, OrderLine};
use boxoffice_core::status::{OrderStatus, StatusId};
use boxoffice_core::types::{DbId, MinorUnits, Timestamp, Units};
use sqlx::FromRow;

/// A row from the `orders` table.
#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: DbId,
    pub code: String,
    pub secret: String,
    pub status_id: StatusId,
    pub email: String,
    pub customer_name: Option<String>,
    pub total_amount: MinorUnits,
    pub currency: String,
    pub expires_at: Timestamp,
    pub paid_at: Option<Timestamp>,
    pub confirmed_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<OrderRow> for Order {
    type Error = GatewayError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::from_id(row.status_id).ok_or_else(|| {
            GatewayError::Invalid(format!(
                "orders.{} has unknown status_id {}",
                row.id, row.status_id
            ))
        })?;
        Ok(Order {
            id: row.id,
            code: row.code,
            secret: row.secret,
            status,
            email: row.email,
            customer_name: row.customer_name,
            total_amount: row.total_amount,
            currency: row.currency,
            expires_at: row.expires_at,
            paid_at: row.paid_at,
            confirmed_at: row.confirmed_at,
            closed_at: row.closed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row from the `order_lines` table.
#[derive(Debug, Clone, FromRow)]
pub struct OrderLineRow {
    pub id: DbId,
    pub order_id: DbId,
    pub ticket_tier_id: DbId,
    pub quantity: Units,
    pub unit_price: MinorUnits,
    pub created_at: Timestamp,
}

impl From<OrderLineRow> for OrderLine {
    fn from(row: OrderLineRow) -> Self {
        OrderLine {
            id: row.id,
            order_id: row.order_id,
            ticket_tier_id: row.ticket_tier_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            created_at: row.created_at,
        }
    }
}
