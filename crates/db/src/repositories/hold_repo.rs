//! Repository for the `inventory_holds` table.
//!
//! Every status change is a conditional `UPDATE ... WHERE status_id = active`
//! so a hold moved by a concurrent writer is left alone.

use boxoffice_core::gateway::ReserveRequest;
use boxoffice_core::status::HoldStatus;
use boxoffice_core::types::{DbId, Timestamp, Units};
use sqlx::PgExecutor;

use crate::models::hold::InventoryHoldRow;

/// Column list for `inventory_holds` queries.
const COLUMNS: &str = "\
    id, order_id, ticket_tier_id, quantity, status_id, \
    expires_at, extended_secs, created_at, updated_at";

pub struct HoldRepo;

impl HoldRepo {
    /// Units of a tier held by active holds still before their deadline.
    pub async fn held_units<'e, E: PgExecutor<'e>>(
        executor: E,
        tier_id: DbId,
        now: Timestamp,
    ) -> Result<Units, sqlx::Error> {
        sqlx::query_scalar::<_, Units>(
            "SELECT COALESCE(SUM(quantity), 0)::INTEGER \
             FROM inventory_holds \
             WHERE ticket_tier_id = $1 AND status_id = $2 AND expires_at > $3",
        )
        .bind(tier_id)
        .bind(HoldStatus::Active.id())
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        request: &ReserveRequest,
    ) -> Result<InventoryHoldRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO inventory_holds \
                 (order_id, ticket_tier_id, quantity, status_id, \
                  expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, InventoryHoldRow>(&query)
            .bind(request.order_id)
            .bind(request.tier_id)
            .bind(request.quantity)
            .bind(HoldStatus::Active.id())
            .bind(request.expires_at)
            .bind(request.now)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<InventoryHoldRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM inventory_holds WHERE id = $1");
        sqlx::query_as::<_, InventoryHoldRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<InventoryHoldRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM inventory_holds WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, InventoryHoldRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn list_by_order<'e, E: PgExecutor<'e>>(
        executor: E,
        order_id: DbId,
    ) -> Result<Vec<InventoryHoldRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM inventory_holds WHERE order_id = $1 ORDER BY id");
        sqlx::query_as::<_, InventoryHoldRow>(&query)
            .bind(order_id)
            .fetch_all(executor)
            .await
    }

    /// Lock every hold of an order in ascending id order.
    pub async fn lock_by_order<'e, E: PgExecutor<'e>>(
        executor: E,
        order_id: DbId,
    ) -> Result<Vec<InventoryHoldRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM inventory_holds WHERE order_id = $1 ORDER BY id FOR UPDATE"
        );
        sqlx::query_as::<_, InventoryHoldRow>(&query)
            .bind(order_id)
            .fetch_all(executor)
            .await
    }

    /// Flip the given active holds to confirmed. Returns the number flipped.
    pub async fn mark_confirmed<'e, E: PgExecutor<'e>>(
        executor: E,
        ids: &[DbId],
        now: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE inventory_holds SET status_id = $2, updated_at = $3 \
             WHERE id = ANY($1) AND status_id = $4",
        )
        .bind(ids)
        .bind(HoldStatus::Confirmed.id())
        .bind(now)
        .bind(HoldStatus::Active.id())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Active -> released. `false` if the hold was not active.
    pub async fn release<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE inventory_holds SET status_id = $2, updated_at = $3 \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(HoldStatus::Released.id())
        .bind(now)
        .bind(HoldStatus::Active.id())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Active and past its deadline -> expired. `false` if the hold was
    /// confirmed, released, expired or extended in the meantime.
    pub async fn expire<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE inventory_holds SET status_id = $2, updated_at = $3 \
             WHERE id = $1 AND status_id = $4 AND expires_at <= $3",
        )
        .bind(id)
        .bind(HoldStatus::Expired.id())
        .bind(now)
        .bind(HoldStatus::Active.id())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Push the deadline of an active, unexpired hold forward while its
    /// cumulative extension stays within `max_total_secs`. Returns `None`
    /// when any guard refused the update.
    pub async fn extend<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        extra_secs: i64,
        max_total_secs: i64,
        now: Timestamp,
    ) -> Result<Option<InventoryHoldRow>, sqlx::Error> {
        let query = format!(
            "UPDATE inventory_holds \
             SET expires_at = expires_at + make_interval(secs => $2::DOUBLE PRECISION), \
                 extended_secs = extended_secs + $2, \
                 updated_at = $4 \
             WHERE id = $1 \
               AND status_id = $5 \
               AND expires_at > $4 \
               AND extended_secs + $2 <= $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, InventoryHoldRow>(&query)
            .bind(id)
            .bind(extra_secs)
            .bind(max_total_secs)
            .bind(now)
            .bind(HoldStatus::Active.id())
            .fetch_optional(executor)
            .await
    }

    /// Active holds at or past their deadline, oldest first.
    pub async fn list_overdue<'e, E: PgExecutor<'e>>(
        executor: E,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<InventoryHoldRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM inventory_holds \
             WHERE status_id = $1 AND expires_at <= $2 \
             ORDER BY expires_at, id \
             LIMIT $3"
        );
        sqlx::query_as::<_, InventoryHoldRow>(&query)
            .bind(HoldStatus::Active.id())
            .bind(now)
            .bind(limit)
            .fetch_all(executor)
            .await
    }
}
