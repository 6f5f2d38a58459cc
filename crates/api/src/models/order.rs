//! Order domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use webshop_core::{Email, OrderId, OrderLineId, OrderStatus, ProductId, UserId, line_total};

/// A persisted shop order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopOrder {
    pub id: OrderId,
    pub order_date: DateTime<Utc>,
    pub user_id: UserId,
    pub status: OrderStatus,
}

/// One priced quantity of one product within an order.
///
/// `unit_price` is the catalog price captured when the line was created;
/// totals are always computed from it, never from the current product price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderLine {
    /// Snapshot price times quantity.
    #[must_use]
    pub fn total(&self) -> Decimal {
        line_total(self.unit_price, self.quantity)
    }
}

/// An order line that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// An order and its lines, written in a single transaction.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_date: DateTime<Utc>,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub lines: Vec<NewOrderLine>,
    /// Provider session this order settles. The pending checkout is marked
    /// completed in the same transaction; a second completion is a conflict.
    pub checkout_session_id: Option<String>,
}

/// Owning user as shown in order listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderOwner {
    pub id: UserId,
    pub email: Email,
}

/// Order with owner and computed total, as returned by the listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: OrderId,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub user: OrderOwner,
    pub total: Decimal,
}

impl OrderSummary {
    /// Build a summary from an order, its owner and its lines.
    #[must_use]
    pub fn new(order: ShopOrder, owner: OrderOwner, lines: &[OrderLine]) -> Self {
        Self {
            id: order.id,
            order_date: order.order_date,
            status: order.status,
            user: owner,
            total: lines.iter().map(OrderLine::total).sum(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn line(id: i32, quantity: i32, price: &str) -> OrderLine {
        OrderLine {
            id: OrderLineId::new(id),
            order_id: OrderId::new(1),
            product_id: ProductId::new(id),
            quantity,
            unit_price: Decimal::from_str(price).unwrap(),
        }
    }

    #[test]
    fn test_summary_total_sums_snapshot_prices() {
        let order = ShopOrder {
            id: OrderId::new(1),
            order_date: Utc::now(),
            user_id: UserId::new(7),
            status: OrderStatus::Paid,
        };
        let owner = OrderOwner {
            id: UserId::new(7),
            email: Email::parse("a@x.com").unwrap(),
        };

        let summary = OrderSummary::new(order, owner, &[line(1, 2, "10.50"), line(2, 1, "99")]);

        assert_eq!(summary.total, Decimal::from_str("120.00").unwrap());
        assert_eq!(summary.user.email.as_str(), "a@x.com");
    }

    #[test]
    fn test_summary_total_empty_order() {
        let order = ShopOrder {
            id: OrderId::new(2),
            order_date: Utc::now(),
            user_id: UserId::new(1),
            status: OrderStatus::Pending,
        };
        let owner = OrderOwner {
            id: UserId::new(1),
            email: Email::parse("b@x.com").unwrap(),
        };

        assert_eq!(OrderSummary::new(order, owner, &[]).total, Decimal::ZERO);
    }
}
