use boxoffice_core::tier::TicketTier;
use boxoffice_core::types::{DbId, MinorUnits, Timestamp, Units};
use sqlx::FromRow;

/// A row from the `ticket_tiers` table.
#[derive(Debug, Clone, FromRow)]
pub struct TicketTierRow {
    pub id: DbId,
    pub event_id: DbId,
    pub name: String,
    pub price: MinorUnits,
    pub currency: String,
    pub quota: Units,
    pub sold: Units,
    pub min_purchase: Units,
    pub max_purchase: Option<Units>,
    pub sale_starts_at: Option<Timestamp>,
    pub sale_ends_at: Option<Timestamp>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<TicketTierRow> for TicketTier {
    fn from(row: TicketTierRow) -> Self {
        TicketTier {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            price: row.price,
            currency: row.currency,
            quota: row.quota,
            sold: row.sold,
            min_purchase: row.min_purchase,
            max_purchase: row.max_purchase,
            sale_starts_at: row.sale_starts_at,
            sale_ends_at: row.sale_ends_at,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Insert payload for a tier. Tier management belongs to the organizer
/// CRUD layer; this exists for seeding and tests.
#[derive(Debug, Clone)]
pub struct CreateTicketTier {
    pub event_id: DbId,
    pub name: String,
    pub price: MinorUnits,
    pub currency: String,
    pub quota: Units,
    pub min_purchase: Units,
    pub max_purchase: Option<Units>,
    pub sale_starts_at: Option<Timestamp>,
    pub sale_ends_at: Option<Timestamp>,
    pub is_active: bool,
}
