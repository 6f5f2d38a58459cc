//! Pending checkout repository.
//!
//! One row per provider checkout session, written when the session is created
//! and completed by the webhook reconciler in the order transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;

use webshop_core::OrderId;

use super::{CheckoutStore, RepositoryError, conflict_on_unique};
use crate::models::{CartItem, PendingCheckout};

/// Repository for pending checkouts.
#[derive(Clone)]
pub struct CheckoutRepository {
    pool: PgPool,
}

impl CheckoutRepository {
    /// Create a new checkout repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PendingCheckoutRow {
    session_id: String,
    user_ref: String,
    cart: Json<Vec<CartItem>>,
    created_at: DateTime<Utc>,
    completed_order_id: Option<OrderId>,
}

impl From<PendingCheckoutRow> for PendingCheckout {
    fn from(row: PendingCheckoutRow) -> Self {
        Self {
            session_id: row.session_id,
            user_ref: row.user_ref,
            cart: row.cart.0,
            created_at: row.created_at,
            completed_order_id: row.completed_order_id,
        }
    }
}

#[async_trait]
impl CheckoutStore for CheckoutRepository {
    async fn insert(&self, checkout: &PendingCheckout) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO shop.pending_checkout (session_id, user_ref, cart, created_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&checkout.session_id)
        .bind(&checkout.user_ref)
        .bind(Json(&checkout.cart))
        .bind(checkout.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "checkout session"))?;

        Ok(())
    }

    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingCheckout>, RepositoryError> {
        let row = sqlx::query_as::<_, PendingCheckoutRow>(
            r"
            SELECT session_id, user_ref, cart, created_at, completed_order_id
            FROM shop.pending_checkout
            WHERE session_id = $1
            ",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PendingCheckout::from))
    }
}
