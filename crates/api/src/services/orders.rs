//! Order query service and direct order creation.
//!
//! Every read is gated on the caller's identity. Ownership is decided by
//! comparing the caller's email to the owner's email, exactly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use webshop_core::{OrderId, OrderStatus, ProductId, UserId};

use crate::db::{OrderStore, ProductStore, RepositoryError, Stores, UserStore};
use crate::models::{CurrentUser, NewOrder, NewOrderLine, OrderLine, OrderOwner, OrderSummary, ShopOrder};

/// Errors that can occur while reading or creating orders.
#[derive(Debug, Error)]
pub enum OrderError {
    /// No caller identity.
    #[error("{0}")]
    Unauthorized(&'static str),

    /// Caller is not the owner.
    #[error("{0}")]
    Forbidden(&'static str),

    /// Path id is not a number.
    #[error("invalid order id: {0}")]
    InvalidOrderId(String),

    /// No such order.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// Request names a user that does not exist.
    #[error("user {0} not found")]
    UnknownUser(UserId),

    /// Request names a product that does not exist.
    #[error("product {0} not found")]
    UnknownProduct(ProductId),

    /// Request body is inconsistent.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Body of `POST /api/orders`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    #[serde(alias = "user_id")]
    pub user_id: UserId,
    #[serde(alias = "order_date")]
    pub order_date: DateTime<Utc>,
    pub status: String,
    #[serde(alias = "order_lines")]
    pub order_lines: Vec<OrderLineRequest>,
}

/// One line of an [`OrderRequest`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    #[serde(alias = "product_id")]
    pub product_id: ProductId,
    pub quantity: i32,
    pub price: Decimal,
}

/// A freshly written order with its lines.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    #[serde(flatten)]
    pub order: ShopOrder,
    pub order_lines: Vec<OrderLine>,
}

/// Read side over orders, plus the direct creation path.
#[derive(Clone)]
pub struct OrderQueryService {
    users: Arc<dyn UserStore>,
    products: Arc<dyn ProductStore>,
    orders: Arc<dyn OrderStore>,
}

impl OrderQueryService {
    /// Create an order service over the given stores.
    #[must_use]
    pub fn new(stores: &Stores) -> Self {
        Self {
            users: Arc::clone(&stores.users),
            products: Arc::clone(&stores.products),
            orders: Arc::clone(&stores.orders),
        }
    }

    /// Every order with owner and total.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Unauthorized` without a caller.
    #[instrument(skip(self, caller))]
    pub async fn list_all(
        &self,
        caller: Option<&CurrentUser>,
    ) -> Result<Vec<OrderSummary>, OrderError> {
        caller.ok_or(OrderError::Unauthorized(
            "Orders accessible only to authenticated users",
        ))?;

        let orders = self.orders.list().await?;
        let mut owners: HashMap<UserId, OrderOwner> = HashMap::new();
        let mut summaries = Vec::with_capacity(orders.len());

        for order in orders {
            let owner = match owners.get(&order.user_id) {
                Some(owner) => owner.clone(),
                None => {
                    let user = self.users.find_by_id(order.user_id).await?.ok_or_else(|| {
                        RepositoryError::DataCorruption(format!(
                            "order {} references missing user {}",
                            order.id, order.user_id
                        ))
                    })?;
                    let owner = OrderOwner {
                        id: user.id,
                        email: user.email,
                    };
                    owners.insert(owner.id, owner.clone());
                    owner
                }
            };
            summaries.push(self.summarize(order, owner).await?);
        }

        Ok(summaries)
    }

    /// Orders owned by `username`, visible only to that user.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Unauthorized` without a caller and
    /// `OrderError::Forbidden` when the caller is someone else.
    #[instrument(skip(self, caller))]
    pub async fn list_for_user(
        &self,
        caller: Option<&CurrentUser>,
        username: &str,
    ) -> Result<Vec<OrderSummary>, OrderError> {
        let caller = caller.ok_or(OrderError::Unauthorized(
            "Orders accessible only to authenticated users",
        ))?;
        if !caller.email.matches(username) {
            return Err(OrderError::Forbidden("Orders for other users not accessible!"));
        }

        let owner = OrderOwner {
            id: caller.id,
            email: caller.email.clone(),
        };
        let orders = self.orders.find_by_user(caller.id).await?;

        let mut summaries = Vec::with_capacity(orders.len());
        for order in orders {
            summaries.push(self.summarize(order, owner.clone()).await?);
        }

        Ok(summaries)
    }

    /// Lines of one order, visible only to its owner.
    ///
    /// The id is parsed before anything is looked up.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::InvalidOrderId` for a non-numeric id,
    /// `OrderError::OrderNotFound` for an unknown order, then
    /// `OrderError::Unauthorized` / `OrderError::Forbidden` by caller.
    #[instrument(skip(self, caller))]
    pub async fn list_lines(
        &self,
        caller: Option<&CurrentUser>,
        order_id: &str,
    ) -> Result<Vec<OrderLine>, OrderError> {
        let order_id: OrderId = order_id
            .parse()
            .map_err(|_| OrderError::InvalidOrderId(order_id.to_string()))?;

        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))?;

        let owner = self.users.find_by_id(order.user_id).await?;

        let caller = caller.ok_or(OrderError::Unauthorized(
            "Order lines accessible only to authenticated users",
        ))?;
        if owner.is_none_or(|owner| owner.email != caller.email) {
            return Err(OrderError::Forbidden(
                "Order lines for other users not accessible!",
            ));
        }

        Ok(self.orders.find_lines_by_order(order.id).await?)
    }

    /// Write an order exactly as submitted.
    ///
    /// The user and every product are checked first; the order and all lines
    /// are then written together.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::UnknownUser` / `OrderError::UnknownProduct` for
    /// dangling references and `OrderError::InvalidOrder` for empty statuses
    /// or non-positive quantities. Nothing is written on error.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, lines = request.order_lines.len()))]
    pub async fn create_order(&self, request: OrderRequest) -> Result<CreatedOrder, OrderError> {
        if request.status.trim().is_empty() {
            return Err(OrderError::InvalidOrder("status is required".to_string()));
        }

        self.users
            .find_by_id(request.user_id)
            .await?
            .ok_or(OrderError::UnknownUser(request.user_id))?;

        let mut lines = Vec::with_capacity(request.order_lines.len());
        for line in request.order_lines {
            if line.quantity <= 0 {
                return Err(OrderError::InvalidOrder(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
            self.products
                .find_by_id(line.product_id)
                .await?
                .ok_or(OrderError::UnknownProduct(line.product_id))?;
            lines.push(NewOrderLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.price,
            });
        }

        let (order, order_lines) = self
            .orders
            .create(NewOrder {
                order_date: request.order_date,
                user_id: request.user_id,
                status: OrderStatus::from(request.status),
                lines,
                checkout_session_id: None,
            })
            .await?;

        info!(order_id = %order.id, "Order created");

        Ok(CreatedOrder { order, order_lines })
    }

    async fn summarize(
        &self,
        order: ShopOrder,
        owner: OrderOwner,
    ) -> Result<OrderSummary, OrderError> {
        let lines = self.orders.find_lines_by_order(order.id).await?;
        Ok(OrderSummary::new(order, owner, &lines))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use webshop_core::Email;

    use super::*;
    use crate::db::MemoryStore;

    fn caller(id: UserId, email: Email) -> CurrentUser {
        CurrentUser { id, email }
    }

    struct Harness {
        store: MemoryStore,
        service: OrderQueryService,
        alice: CurrentUser,
        bob: CurrentUser,
    }

    async fn harness() -> Harness {
        let store = MemoryStore::new();
        store.put_product(1, "Green tea", Decimal::from_str("49.90").unwrap()).await;
        let alice = store.put_user(&Email::parse("a@x.com").unwrap()).await;
        let bob = store.put_user(&Email::parse("b@x.com").unwrap()).await;
        Harness {
            service: OrderQueryService::new(&Stores::memory(&store)),
            store,
            alice: caller(alice.id, alice.email),
            bob: caller(bob.id, bob.email),
        }
    }

    fn request(user_id: UserId, product: i32, quantity: i32) -> OrderRequest {
        OrderRequest {
            user_id,
            order_date: Utc::now(),
            status: "Paid".to_string(),
            order_lines: vec![OrderLineRequest {
                product_id: ProductId::new(product),
                quantity,
                price: Decimal::from_str("49.90").unwrap(),
            }],
        }
    }

    #[tokio::test]
    async fn test_list_for_user_access_rules() {
        let h = harness().await;
        h.service.create_order(request(h.alice.id, 1, 2)).await.unwrap();

        assert!(matches!(
            h.service.list_for_user(None, "a@x.com").await,
            Err(OrderError::Unauthorized(_))
        ));
        assert!(matches!(
            h.service.list_for_user(Some(&h.bob), "a@x.com").await,
            Err(OrderError::Forbidden(_))
        ));

        let orders = h.service.list_for_user(Some(&h.alice), "a@x.com").await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].total, Decimal::from_str("99.80").unwrap());
        assert_eq!(orders[0].user.email.as_str(), "a@x.com");
    }

    #[tokio::test]
    async fn test_list_for_user_is_case_sensitive() {
        let h = harness().await;
        assert!(matches!(
            h.service.list_for_user(Some(&h.alice), "A@x.com").await,
            Err(OrderError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_list_lines_rejects_non_numeric_id_first() {
        let h = harness().await;
        assert!(matches!(
            h.service.list_lines(None, "abc").await,
            Err(OrderError::InvalidOrderId(_))
        ));
    }

    #[tokio::test]
    async fn test_list_lines_access_rules() {
        let h = harness().await;
        let created = h.service.create_order(request(h.alice.id, 1, 2)).await.unwrap();
        let id = created.order.id.to_string();

        assert!(matches!(
            h.service.list_lines(Some(&h.alice), "999").await,
            Err(OrderError::OrderNotFound(_))
        ));
        assert!(matches!(
            h.service.list_lines(None, &id).await,
            Err(OrderError::Unauthorized(_))
        ));
        assert!(matches!(
            h.service.list_lines(Some(&h.bob), &id).await,
            Err(OrderError::Forbidden(_))
        ));
        let lines = h.service.list_lines(Some(&h.alice), &id).await.unwrap();
        assert_eq!(lines, created.order_lines);
    }

    #[tokio::test]
    async fn test_list_all_requires_caller() {
        let h = harness().await;
        h.service.create_order(request(h.alice.id, 1, 1)).await.unwrap();
        h.service.create_order(request(h.bob.id, 1, 1)).await.unwrap();

        assert!(matches!(
            h.service.list_all(None).await,
            Err(OrderError::Unauthorized(_))
        ));
        let all = h.service.list_all(Some(&h.bob)).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_create_order_unknown_product_writes_nothing() {
        let h = harness().await;
        let mut req = request(h.alice.id, 1, 1);
        req.order_lines.push(OrderLineRequest {
            product_id: ProductId::new(404),
            quantity: 1,
            price: Decimal::ONE,
        });

        assert!(matches!(
            h.service.create_order(req).await,
            Err(OrderError::UnknownProduct(_))
        ));
        assert_eq!(h.store.order_count().await, 0);
        assert_eq!(h.store.line_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_order_unknown_user() {
        let h = harness().await;
        assert!(matches!(
            h.service.create_order(request(UserId::new(404), 1, 1)).await,
            Err(OrderError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_create_order_keeps_submitted_status() {
        let h = harness().await;
        let mut req = request(h.alice.id, 1, 1);
        req.status = "Shipped".to_string();

        let created = h.service.create_order(req).await.unwrap();

        assert_eq!(created.order.status, OrderStatus::Shipped);
        assert_eq!(created.order_lines.len(), 1);
    }

    #[test]
    fn test_order_request_accepts_snake_case() {
        let json = r#"{
            "user_id": 1,
            "order_date": "2024-05-01T12:00:00Z",
            "status": "Paid",
            "order_lines": [{"product_id": 1, "quantity": 2, "price": "49.90"}]
        }"#;
        let req: OrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.order_lines[0].product_id, ProductId::new(1));
    }
}
