//! Checkout domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use webshop_core::{OrderId, ProductId};

/// One cart entry as submitted by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Local record of a provider checkout session awaiting its completion event.
///
/// Keyed by the provider session id, so any number of checkouts can be in
/// flight at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCheckout {
    pub session_id: String,
    /// User identifier exactly as submitted with the cart.
    pub user_ref: String,
    pub cart: Vec<CartItem>,
    pub created_at: DateTime<Utc>,
    pub completed_order_id: Option<OrderId>,
}

impl PendingCheckout {
    /// Whether an order has already been created for this session.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed_order_id.is_some()
    }
}
