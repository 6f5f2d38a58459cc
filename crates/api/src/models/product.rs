//! Catalog product.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use webshop_core::ProductId;

/// A product in the catalog.
///
/// `price` is in the settlement currency's major unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
}
