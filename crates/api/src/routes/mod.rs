//! HTTP route handlers for the API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                           - Liveness check
//! GET  /health/ready                     - Database readiness (binary only)
//!
//! # Checkout
//! POST /api/create-checkout-session      - Open a hosted checkout, returns {url}
//! POST /api/webhook                      - Provider callback (Stripe-Signature)
//!
//! # Orders
//! POST /api/orders                       - Create an order directly
//! GET  /api/orders                       - All orders with owner detail
//! GET  /api/orders/{username}            - Orders of one user (owner only)
//! GET  /api/orders/orderlines/{orderid}  - Lines of one order (owner only)
//!
//! # Catalog
//! GET  /api/products                     - Product listing
//! GET  /api/products/{id}                - Product detail
//!
//! # Auth
//! POST /api/authenticate                 - Password login
//! POST /api/logout                       - Logout
//! ```

pub mod auth;
pub mod checkout;
pub mod orders;
pub mod products;
pub mod webhook;

use axum::{
    Router,
    routing::{get, post},
};

use crate::middleware::{auth_rate_limiter, checkout_rate_limiter};
use crate::state::AppState;

/// Create the checkout and webhook routes router.
///
/// The webhook route is never rate limited; the provider retries on 429.
pub fn checkout_routes(rate_limited: bool) -> Router<AppState> {
    let create = post(checkout::create_checkout_session);
    let create = if rate_limited {
        create.layer(checkout_rate_limiter())
    } else {
        create
    };

    Router::new()
        .route("/create-checkout-session", create)
        .route("/webhook", post(webhook::receive))
}

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(orders::index).post(orders::create))
        .route("/orderlines/{orderid}", get(orders::lines))
        .route("/{username}", get(orders::for_user))
}

/// Create the product routes router.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(products::index))
        .route("/{id}", get(products::show))
}

/// Create the auth routes router.
pub fn auth_routes(rate_limited: bool) -> Router<AppState> {
    let authenticate = post(auth::authenticate);
    let authenticate = if rate_limited {
        authenticate.layer(auth_rate_limiter())
    } else {
        authenticate
    };

    Router::new()
        .route("/authenticate", authenticate)
        .route("/logout", post(auth::logout))
}

/// Build the complete `/api` router.
///
/// `rate_limited` turns the per-IP limits on. They need the client address,
/// so routers served without `ConnectInfo` or proxy headers leave them off.
pub fn routes(rate_limited: bool) -> Router<AppState> {
    let api = Router::new()
        .merge(checkout_routes(rate_limited))
        .merge(auth_routes(rate_limited))
        .nest("/orders", order_routes())
        .nest("/products", product_routes());

    Router::new().nest("/api", api)
}
