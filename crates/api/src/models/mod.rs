//! Domain models for the webshop.
//!
//! Entities reference each other by id only; there is no object graph
//! between orders, lines and users.

pub mod checkout;
pub mod order;
pub mod product;
pub mod session;
pub mod user;

pub use checkout::{CartItem, PendingCheckout};
pub use order::{NewOrder, NewOrderLine, OrderLine, OrderOwner, OrderSummary, ShopOrder};
pub use product::Product;
pub use session::{CurrentUser, keys as session_keys};
pub use user::User;
