//! In-memory store implementing every store trait.
//!
//! Backs the unit and integration tests. All
//! tables live behind one async mutex, so the order write is atomic the same
//! way the `PostgreSQL` transaction is.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use webshop_core::{Email, OrderId, OrderLineId, ProductId, UserId};

use super::{CheckoutStore, OrderStore, ProductStore, RepositoryError, UserStore};
use crate::models::{NewOrder, OrderLine, PendingCheckout, Product, ShopOrder, User};

#[derive(Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    users: BTreeMap<UserId, (User, Option<String>)>,
    orders: BTreeMap<OrderId, ShopOrder>,
    lines: BTreeMap<OrderLineId, OrderLine>,
    checkouts: BTreeMap<String, PendingCheckout>,
    next_user: i32,
    next_order: i32,
    next_line: i32,
}

/// Shared in-memory store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a catalog product.
    pub async fn put_product(&self, id: i32, name: &str, price: Decimal) -> Product {
        let product = Product {
            id: ProductId::new(id),
            name: name.to_owned(),
            price,
        };
        self.tables
            .lock()
            .await
            .products
            .insert(product.id, product.clone());
        product
    }

    /// Change a product's current price. Existing order lines keep theirs.
    pub async fn set_price(&self, id: ProductId, price: Decimal) {
        if let Some(product) = self.tables.lock().await.products.get_mut(&id) {
            product.price = price;
        }
    }

    /// Add a user without a password.
    pub async fn put_user(&self, email: &Email) -> User {
        let mut tables = self.tables.lock().await;
        tables.next_user += 1;
        let user = User {
            id: UserId::new(tables.next_user),
            email: email.clone(),
        };
        tables.users.insert(user.id, (user.clone(), None));
        user
    }

    /// Number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    /// Number of stored order lines.
    pub async fn line_count(&self) -> usize {
        self.tables.lock().await.lines.len()
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Product>, RepositoryError> {
        Ok(self.tables.lock().await.products.values().cloned().collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .get(&id)
            .map(|(user, _)| user.clone()))
    }

    async fn find_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .find(|(user, _)| &user.email == email)
            .map(|(user, _)| user.clone()))
    }

    async fn find_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .find(|(user, _)| &user.email == email)
            .and_then(|(user, hash)| hash.clone().map(|hash| (user.clone(), hash))))
    }

    async fn create_with_password(
        &self,
        email: &Email,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|(user, _)| &user.email == email) {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }
        tables.next_user += 1;
        let user = User {
            id: UserId::new(tables.next_user),
            email: email.clone(),
        };
        tables
            .users
            .insert(user.id, (user.clone(), Some(password_hash.to_owned())));
        Ok(user)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<ShopOrder>, RepositoryError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<ShopOrder>, RepositoryError> {
        Ok(self.tables.lock().await.orders.values().cloned().collect())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<ShopOrder>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_lines_by_order(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<OrderLine>, RepositoryError> {
        Ok(self
            .tables
            .lock()
            .await
            .lines
            .values()
            .filter(|line| line.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        order: NewOrder,
    ) -> Result<(ShopOrder, Vec<OrderLine>), RepositoryError> {
        let mut tables = self.tables.lock().await;

        // Check everything before the first write; the lock makes this atomic.
        if let Some(session_id) = &order.checkout_session_id {
            match tables.checkouts.get(session_id) {
                Some(checkout) if !checkout.is_completed() => {}
                _ => {
                    return Err(RepositoryError::Conflict(format!(
                        "checkout session {session_id} already completed"
                    )));
                }
            }
        }

        tables.next_order += 1;
        let created = ShopOrder {
            id: OrderId::new(tables.next_order),
            order_date: order.order_date,
            user_id: order.user_id,
            status: order.status,
        };
        tables.orders.insert(created.id, created.clone());

        let mut lines = Vec::with_capacity(order.lines.len());
        for line in order.lines {
            tables.next_line += 1;
            let stored = OrderLine {
                id: OrderLineId::new(tables.next_line),
                order_id: created.id,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            };
            tables.lines.insert(stored.id, stored.clone());
            lines.push(stored);
        }

        if let Some(session_id) = &order.checkout_session_id
            && let Some(checkout) = tables.checkouts.get_mut(session_id)
        {
            checkout.completed_order_id = Some(created.id);
        }

        Ok((created, lines))
    }
}

#[async_trait]
impl CheckoutStore for MemoryStore {
    async fn insert(&self, checkout: &PendingCheckout) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;
        if tables.checkouts.contains_key(&checkout.session_id) {
            return Err(RepositoryError::Conflict(
                "checkout session already exists".to_owned(),
            ));
        }
        tables
            .checkouts
            .insert(checkout.session_id.clone(), checkout.clone());
        Ok(())
    }

    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingCheckout>, RepositoryError> {
        Ok(self.tables.lock().await.checkouts.get(session_id).cloned())
    }
}
