//! Repository for the `ticket_tiers` table.

use boxoffice_core::types::{DbId, Timestamp, Units};
use sqlx::PgExecutor;

use crate::models::tier::{CreateTicketTier, TicketTierRow};

/// Column list for `ticket_tiers` queries.
const COLUMNS: &str = "\
    id, event_id, name, price, currency, quota, sold, \
    min_purchase, max_purchase, sale_starts_at, sale_ends_at, \
    is_active, created_at, updated_at";

pub struct TicketTierRepo;

impl TicketTierRepo {
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &CreateTicketTier,
        now: Timestamp,
    ) -> Result<TicketTierRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO ticket_tiers \
                 (event_id, name, price, currency, quota, min_purchase, max_purchase, \
                  sale_starts_at, sale_ends_at, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TicketTierRow>(&query)
            .bind(input.event_id)
            .bind(&input.name)
            .bind(input.price)
            .bind(&input.currency)
            .bind(input.quota)
            .bind(input.min_purchase)
            .bind(input.max_purchase)
            .bind(input.sale_starts_at)
            .bind(input.sale_ends_at)
            .bind(input.is_active)
            .bind(now)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<TicketTierRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM ticket_tiers WHERE id = $1");
        sqlx::query_as::<_, TicketTierRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Lock one tier row until the surrounding transaction ends.
    ///
    /// `FOR NO KEY UPDATE` serializes capacity decisions on the tier without
    /// blocking inserts that merely reference it (holds, order lines).
    pub async fn find_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<TicketTierRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM ticket_tiers WHERE id = $1 FOR NO KEY UPDATE");
        sqlx::query_as::<_, TicketTierRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Lock several tiers in ascending id order.
    pub async fn lock_many<'e, E: PgExecutor<'e>>(
        executor: E,
        ids: &[DbId],
    ) -> Result<Vec<TicketTierRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ticket_tiers \
             WHERE id = ANY($1) \
             ORDER BY id \
             FOR NO KEY UPDATE"
        );
        sqlx::query_as::<_, TicketTierRow>(&query)
            .bind(ids)
            .fetch_all(executor)
            .await
    }

    /// Add confirmed units to `sold`, only while the result stays within
    /// `quota`. Returns `None` when the guard refused the update.
    pub async fn add_sold<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        quantity: Units,
        now: Timestamp,
    ) -> Result<Option<TicketTierRow>, sqlx::Error> {
        let query = format!(
            "UPDATE ticket_tiers \
             SET sold = sold + $2, updated_at = $3 \
             WHERE id = $1 AND sold + $2 <= quota \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TicketTierRow>(&query)
            .bind(id)
            .bind(quantity)
            .bind(now)
            .fetch_optional(executor)
            .await
    }

    pub async fn set_quota<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        quota: Units,
        now: Timestamp,
    ) -> Result<Option<TicketTierRow>, sqlx::Error> {
        let query = format!(
            "UPDATE ticket_tiers SET quota = $2, updated_at = $3 WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TicketTierRow>(&query)
            .bind(id)
            .bind(quota)
            .bind(now)
            .fetch_optional(executor)
            .await
    }

    /// Take a tier on or off sale.
    pub async fn set_active<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        is_active: bool,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE ticket_tiers SET is_active = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(is_active)
                .bind(now)
                .execute(executor)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
