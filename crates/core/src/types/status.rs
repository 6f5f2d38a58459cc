//! Order status.
//!
//! Statuses are stored as free text. Orders created from a completed checkout
//! are always `Paid`; the direct order-creation endpoint accepts whatever
//! status the caller sends, so unknown values round-trip through `Other`.

use serde::{Deserialize, Serialize};

/// Status of a shop order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Cancelled,
    /// Any status string not listed above.
    Other(String),
}

impl OrderStatus {
    /// The stored representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Paid => "Paid",
            Self::Shipped => "Shipped",
            Self::Cancelled => "Cancelled",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for OrderStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Pending" => Self::Pending,
            "Paid" => Self::Paid,
            "Shipped" => Self::Shipped,
            "Cancelled" => Self::Cancelled,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for OrderStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        match status {
            OrderStatus::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_known_statuses_round_trip() {
        for name in ["Pending", "Paid", "Shipped", "Cancelled"] {
            let status = OrderStatus::from(name);
            assert!(!matches!(status, OrderStatus::Other(_)));
            assert_eq!(status.as_str(), name);
        }
    }

    #[test]
    fn test_unknown_status_is_preserved() {
        let status = OrderStatus::from("Awaiting pickup");
        assert_eq!(status, OrderStatus::Other("Awaiting pickup".to_owned()));
        assert_eq!(String::from(status), "Awaiting pickup");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        assert_eq!(serde_json::to_string(&OrderStatus::Paid).unwrap(), "\"Paid\"");
        let parsed: OrderStatus = serde_json::from_str("\"paid\"").unwrap();
        assert_eq!(parsed, OrderStatus::Other("paid".to_owned()));
    }
}
