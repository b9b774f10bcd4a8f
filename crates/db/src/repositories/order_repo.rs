//! Repository for the `orders` and `order_lines` tables.

use boxoffice_core::order::{NewOrder, NewOrderLine};
use boxoffice_core::status::{HoldStatus, OrderStatus};
use boxoffice_core::types::{DbId, Timestamp};
use sqlx::PgExecutor;

use crate::models::order::{OrderLineRow, OrderRow};

/// Column list for `orders` queries.
const COLUMNS: &str = "\
    id, code, secret, status_id, email, customer_name, total_amount, currency, \
    expires_at, paid_at, confirmed_at, closed_at, created_at, updated_at";

/// Column list for `order_lines` queries.
const LINE_COLUMNS: &str = "\
    id, order_id, ticket_tier_id, quantity, unit_price, created_at";

pub struct OrderRepo;

impl OrderRepo {
    /// Insert a pending order. Lines are inserted separately in the same
    /// transaction.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &NewOrder,
    ) -> Result<OrderRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO orders \
                 (code, secret, status_id, email, customer_name, total_amount, currency, \
                  expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OrderRow>(&query)
            .bind(&input.code)
            .bind(&input.secret)
            .bind(OrderStatus::Pending.id())
            .bind(&input.email)
            .bind(&input.customer_name)
            .bind(input.total_amount)
            .bind(&input.currency)
            .bind(input.expires_at)
            .bind(input.created_at)
            .fetch_one(executor)
            .await
    }

    pub async fn create_line<'e, E: PgExecutor<'e>>(
        executor: E,
        order_id: DbId,
        line: &NewOrderLine,
        now: Timestamp,
    ) -> Result<OrderLineRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO order_lines \
                 (order_id, ticket_tier_id, quantity, unit_price, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5) \
             RETURNING {LINE_COLUMNS}"
        );
        sqlx::query_as::<_, OrderLineRow>(&query)
            .bind(order_id)
            .bind(line.ticket_tier_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(now)
            .fetch_one(executor)
            .await
    }

    pub async fn find_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<OrderRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM orders WHERE id = $1");
        sqlx::query_as::<_, OrderRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Lock an order row until the surrounding transaction ends.
    pub async fn find_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
    ) -> Result<Option<OrderRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM orders WHERE id = $1 FOR NO KEY UPDATE");
        sqlx::query_as::<_, OrderRow>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn list_lines<'e, E: PgExecutor<'e>>(
        executor: E,
        order_id: DbId,
    ) -> Result<Vec<OrderLineRow>, sqlx::Error> {
        let query =
            format!("SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = $1 ORDER BY id");
        sqlx::query_as::<_, OrderLineRow>(&query)
            .bind(order_id)
            .fetch_all(executor)
            .await
    }

    /// Move an order from `from` to `to` only if it is still in `from`,
    /// stamping the matching lifecycle column. Returns `None` when the
    /// order is no longer in `from`.
    pub async fn transition<'e, E: PgExecutor<'e>>(
        executor: E,
        id: DbId,
        from: OrderStatus,
        to: OrderStatus,
        now: Timestamp,
    ) -> Result<Option<OrderRow>, sqlx::Error> {
        let stamp = match to {
            OrderStatus::Paid => ", paid_at = $4",
            OrderStatus::Confirmed => ", confirmed_at = $4",
            OrderStatus::Expired | OrderStatus::Cancelled | OrderStatus::Refunded => {
                ", closed_at = $4"
            }
            OrderStatus::Pending => "",
        };
        let query = format!(
            "UPDATE orders SET status_id = $3, updated_at = $4{stamp} \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OrderRow>(&query)
            .bind(id)
            .bind(from.id())
            .bind(to.id())
            .bind(now)
            .fetch_optional(executor)
            .await
    }

    /// Pending orders past their deadline with no active hold left.
    pub async fn list_expired_pending<'e, E: PgExecutor<'e>>(
        executor: E,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<OrderRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM orders o \
             WHERE o.status_id = $1 \
               AND o.expires_at <= $2 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM inventory_holds h \
                   WHERE h.order_id = o.id AND h.status_id = $3 \
               ) \
             ORDER BY o.expires_at, o.id \
             LIMIT $4"
        );
        sqlx::query_as::<_, OrderRow>(&query)
            .bind(OrderStatus::Pending.id())
            .bind(now)
            .bind(HoldStatus::Active.id())
            .bind(limit)
            .fetch_all(executor)
            .await
    }
}
