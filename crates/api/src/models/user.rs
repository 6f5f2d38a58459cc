//! User domain type.

use serde::Serialize;

use webshop_core::{Email, UserId};

/// A registered shop user.
///
/// The email address is the identity key for order ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID.
    pub id: UserId,
    /// User's email address.
    pub email: Email,
}
