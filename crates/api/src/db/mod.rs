//! Database operations for the webshop `PostgreSQL` store.
//!
//! # Database: `webshop`
//!
//! ## Tables
//!
//! - `shop.product` - Catalog products (name, price)
//! - `shop.user` - Shop users, identified by email
//! - `shop.user_password` - Argon2id password hashes
//! - `shop.shop_order` - Orders, one per completed checkout or direct creation
//! - `shop.order_line` - Order lines with snapshot unit prices
//! - `shop.pending_checkout` - Provider checkout sessions awaiting completion
//! - `tower_sessions.session` - Tower-sessions storage
//!
//! # Store traits
//!
//! Services never see `PgPool` directly. They hold `Arc<dyn …>` handles to the
//! traits below, offering exactly the lookups the flows need. The `PostgreSQL`
//! repositories implement them for production; [`memory::MemoryStore`]
//! implements all of them for tests and local runs without a database.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/api/migrations/` and run via:
//! ```bash
//! cargo run -p webshop-cli -- migrate
//! ```

pub mod checkouts;
pub mod memory;
pub mod orders;
pub mod products;
pub mod users;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use webshop_core::{Email, OrderId, ProductId, UserId};

use crate::models::{NewOrder, OrderLine, PendingCheckout, Product, ShopOrder, User};

pub use checkouts::CheckoutRepository;
pub use memory::MemoryStore;
pub use orders::OrderRepository;
pub use products::ProductRepository;
pub use users::UserRepository;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email, checkout already completed).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Catalog lookups.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Find a product by id.
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// All products, ordered by id.
    async fn list(&self) -> Result<Vec<Product>, RepositoryError>;
}

/// User lookups.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by id.
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    /// Find a user by email address.
    async fn find_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError>;

    /// A user together with their password hash, if one is set.
    async fn find_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError>;

    /// Create a user with a password hash.
    ///
    /// Returns `RepositoryError::Conflict` if the email is taken.
    async fn create_with_password(
        &self,
        email: &Email,
        password_hash: &str,
    ) -> Result<User, RepositoryError>;
}

/// Order reads and the transactional order write.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Find an order by id.
    async fn find_by_id(&self, id: OrderId) -> Result<Option<ShopOrder>, RepositoryError>;

    /// All orders, oldest first.
    async fn list(&self) -> Result<Vec<ShopOrder>, RepositoryError>;

    /// Orders owned by a user, oldest first.
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<ShopOrder>, RepositoryError>;

    /// Lines of an order.
    async fn find_lines_by_order(&self, order_id: OrderId)
    -> Result<Vec<OrderLine>, RepositoryError>;

    /// Write an order and all of its lines atomically.
    ///
    /// When `checkout_session_id` is set the matching pending checkout is
    /// marked completed in the same transaction. If it is already completed
    /// (or unknown) nothing is written and `RepositoryError::Conflict` is
    /// returned.
    async fn create(
        &self,
        order: NewOrder,
    ) -> Result<(ShopOrder, Vec<OrderLine>), RepositoryError>;
}

/// Registry of provider checkout sessions.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Record a freshly created session.
    async fn insert(&self, checkout: &PendingCheckout) -> Result<(), RepositoryError>;

    /// Look up a session by provider id.
    async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingCheckout>, RepositoryError>;
}

/// The set of store handles the services are built from.
#[derive(Clone)]
pub struct Stores {
    pub products: Arc<dyn ProductStore>,
    pub users: Arc<dyn UserStore>,
    pub orders: Arc<dyn OrderStore>,
    pub checkouts: Arc<dyn CheckoutStore>,
}

impl Stores {
    /// `PostgreSQL`-backed stores sharing one pool.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            products: Arc::new(ProductRepository::new(pool.clone())),
            users: Arc::new(UserRepository::new(pool.clone())),
            orders: Arc::new(OrderRepository::new(pool.clone())),
            checkouts: Arc::new(CheckoutRepository::new(pool.clone())),
        }
    }

    /// All four stores backed by one in-memory store.
    #[must_use]
    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            products: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            orders: Arc::new(store.clone()),
            checkouts: Arc::new(store.clone()),
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map a unique-violation into `RepositoryError::Conflict`.
fn conflict_on_unique(e: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("{what} already exists"));
    }
    RepositoryError::Database(e)
}
