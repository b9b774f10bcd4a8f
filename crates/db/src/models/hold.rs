use boxoffice_core::gateway::GatewayError;
use boxoffice_core::hold::InventoryHold;
use boxoffice_core::status::{HoldStatus, StatusId};
use boxoffice_core::types::{DbId, Timestamp, Units};
use sqlx::FromRow;

/// A row from the `inventory_holds` table.
#[derive(Debug, Clone, FromRow)]
pub struct InventoryHoldRow {
    pub id: DbId,
    pub order_id: DbId,
    pub ticket_tier_id: DbId,
    pub quantity: Units,
    pub status_id: StatusId,
    pub expires_at: Timestamp,
    pub extended_secs: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<InventoryHoldRow> for InventoryHold {
    type Error = GatewayError;

    fn try_from(row: InventoryHoldRow) -> Result<Self, Self::Error> {
        let status = HoldStatus::from_id(row.status_id).ok_or_else(|| {
            GatewayError::Invalid(format!(
                "inventory_holds.{} has unknown status_id {}",
                row.id, row.status_id
            ))
        })?;
        Ok(InventoryHold {
            id: row.id,
            order_id: row.order_id,
            ticket_tier_id: row.ticket_tier_id,
            quantity: row.quantity,
            status,
            expires_at: row.expires_at,
            extended_secs: row.extended_secs,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Convert a batch of rows, failing on the first bad status.
pub fn into_holds(rows: Vec<InventoryHoldRow>) -> Result<Vec<InventoryHold>, GatewayError> {
    rows.into_iter().map(InventoryHold::try_from).collect()
}
