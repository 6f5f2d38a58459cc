//! Order repository.
//!
//! Orders and their lines are only ever written together, inside one
//! transaction, and are never updated afterwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use webshop_core::{OrderId, UserId};

use super::{OrderStore, RepositoryError};
use crate::models::{NewOrder, OrderLine, ShopOrder};

/// Repository for orders and order lines.
#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    order_date: DateTime<Utc>,
    user_id: UserId,
    status: String,
}

impl From<OrderRow> for ShopOrder {
    fn from(row: OrderRow) -> Self {
        Self {
            id: row.id,
            order_date: row.order_date,
            user_id: row.user_id,
            status: row.status.into(),
        }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<ShopOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, order_date, user_id, status
            FROM shop.shop_order
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ShopOrder::from))
    }

    async fn list(&self) -> Result<Vec<ShopOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, order_date, user_id, status
            FROM shop.shop_order
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ShopOrder::from).collect())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<ShopOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT id, order_date, user_id, status
            FROM shop.shop_order
            WHERE user_id = $1
            ORDER BY id
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ShopOrder::from).collect())
    }

    async fn find_lines_by_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<OrderLine>, RepositoryError> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r"
            SELECT id, order_id, product_id, quantity, unit_price
            FROM shop.order_line
            WHERE order_id = $1
            ORDER BY id
            ",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    async fn create(
        &self,
        order: NewOrder,
    ) -> Result<(ShopOrder, Vec<OrderLine>), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let created: ShopOrder = sqlx::query_as::<_, OrderRow>(
            r"
            INSERT INTO shop.shop_order (order_date, user_id, status)
            VALUES ($1, $2, $3)
            RETURNING id, order_date, user_id, status
            ",
        )
        .bind(order.order_date)
        .bind(order.user_id)
        .bind(order.status.as_str())
        .fetch_one(&mut *tx)
        .await?
        .into();

        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let inserted = sqlx::query_as::<_, OrderLine>(
                r"
                INSERT INTO shop.order_line (order_id, product_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                RETURNING id, order_id, product_id, quantity, unit_price
                ",
            )
            .bind(created.id)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .fetch_one(&mut *tx)
            .await?;
            lines.push(inserted);
        }

        if let Some(session_id) = &order.checkout_session_id {
            // Only the first completion wins; the row lock serialises redeliveries.
            let result = sqlx::query(
                r"
                UPDATE shop.pending_checkout
                SET completed_order_id = $1, completed_at = NOW()
                WHERE session_id = $2 AND completed_order_id IS NULL
                ",
            )
            .bind(created.id)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(RepositoryError::Conflict(format!(
                    "checkout session {session_id} already completed"
                )));
            }
        }

        tx.commit().await?;

        Ok((created, lines))
    }
}
