//! Business logic services.
//!
//! # Services
//!
//! - `auth` - Email + password login
//! - `checkout` - Cart to hosted checkout session
//! - `reconcile` - Completed checkout webhooks to orders
//! - `orders` - Order history reads and direct order creation
//!
//! Each service owns `Arc<dyn …>` handles to the stores and gateway it needs;
//! `AppState` builds them once at startup.

pub mod auth;
pub mod checkout;
pub mod orders;
pub mod reconcile;

pub use auth::{AuthError, AuthService};
pub use checkout::{CheckoutError, CheckoutService, CreatedCheckout};
pub use orders::{CreatedOrder, OrderError, OrderLineRequest, OrderQueryService, OrderRequest};
pub use reconcile::{ReconcileError, ReconcileOutcome, WebhookReconciler};
