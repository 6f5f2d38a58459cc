//! Seed the catalog and user table.
//!
//! Reads products and users from a YAML file, validates the whole file, then
//! writes. Products are upserted by id; users that already exist are kept.
//!
//! ```yaml
//! products:
//!   - id: 1
//!     name: Hoodie
//!     price: "549.00"
//! users:
//!   - email: a@example.com
//!     password: correct horse battery
//! ```

use std::path::Path;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use webshop_api::db::{ProductRepository, UserRepository};
use webshop_api::services::{AuthError, AuthService};
use webshop_core::{ProductId, UserId};

use super::connect;

/// Contents of a seed file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub products: Vec<SeedProduct>,
    pub users: Vec<SeedUser>,
}

/// One catalog entry.
#[derive(Debug, Deserialize)]
pub struct SeedProduct {
    pub id: i32,
    pub name: String,
    pub price: Decimal,
}

/// One user with a plaintext password, hashed on insert.
#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub email: String,
    pub password: String,
}

/// Problems found in a seed file before anything is written.
fn validate(seed: &SeedFile) -> Vec<String> {
    let mut errors = Vec::new();
    let mut ids = std::collections::HashSet::new();

    for product in &seed.products {
        if product.id <= 0 {
            errors.push(format!("product id {} must be positive", product.id));
        }
        if !ids.insert(product.id) {
            errors.push(format!("product id {} appears twice", product.id));
        }
        if product.name.trim().is_empty() {
            errors.push(format!("product {} has no name", product.id));
        }
        if product.price.is_sign_negative() {
            errors.push(format!("product {} has a negative price", product.id));
        }
    }

    for user in &seed.users {
        if webshop_core::Email::parse(&user.email).is_err() {
            errors.push(format!("invalid email: {}", user.email));
        }
    }

    errors
}

/// Seed from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is invalid, or if the
/// database rejects a write.
pub async fn from_file(file_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    info!(path = %file_path, "Loading seed file");

    // Read and validate before connecting to the database
    let content = tokio::fs::read_to_string(path).await?;
    let seed: SeedFile = serde_yaml::from_str(&content)?;

    let errors = validate(&seed);
    if !errors.is_empty() {
        for e in &errors {
            warn!("{e}");
        }
        return Err(format!("Seed file has {} error(s)", errors.len()).into());
    }

    let pool = connect().await?;

    let products = ProductRepository::new(pool.clone());
    for product in &seed.products {
        let saved = products
            .upsert(ProductId::new(product.id), &product.name, product.price)
            .await?;
        info!(product_id = %saved.id, name = %saved.name, "Product seeded");
    }

    let auth = AuthService::new(Arc::new(UserRepository::new(pool)));
    for user in &seed.users {
        match auth.register_with_password(&user.email, &user.password).await {
            Ok(created) => info!(user_id = %created.id, "User seeded"),
            Err(AuthError::UserAlreadyExists) => {
                info!(email = %user.email, "User already exists, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        products = seed.products.len(),
        users = seed.users.len(),
        "Seeding complete"
    );
    Ok(())
}

/// Create one user with a password.
///
/// # Errors
///
/// Returns an error if the email or password is rejected, the user exists,
/// or the database is unavailable.
pub async fn create_user(email: &str, password: &str) -> Result<UserId, Box<dyn std::error::Error>> {
    let pool = connect().await?;
    let auth = AuthService::new(Arc::new(UserRepository::new(pool)));
    let user = auth.register_with_password(email, password).await?;
    Ok(user.id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed_file() {
        let seed: SeedFile = serde_yaml::from_str(
            r#"
products:
  - id: 1
    name: Hoodie
    price: "549.00"
  - id: 2
    name: Cap
    price: "199.50"
users:
  - email: a@example.com
    password: correct horse battery
"#,
        )
        .unwrap();

        assert_eq!(seed.products.len(), 2);
        assert_eq!(seed.products[1].price, Decimal::new(19950, 2));
        assert_eq!(seed.users[0].email, "a@example.com");
        assert!(validate(&seed).is_empty());
    }

    #[test]
    fn test_sections_are_optional() {
        let seed: SeedFile = serde_yaml::from_str("products: []").unwrap();
        assert!(seed.users.is_empty());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let seed = SeedFile {
            products: vec![
                SeedProduct {
                    id: 1,
                    name: "Hoodie".to_string(),
                    price: Decimal::new(54900, 2),
                },
                SeedProduct {
                    id: 1,
                    name: " ".to_string(),
                    price: Decimal::new(-1, 0),
                },
            ],
            users: vec![SeedUser {
                email: "not-an-email".to_string(),
                password: "whatever1".to_string(),
            }],
        };

        let errors = validate(&seed);
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("appears twice")));
        assert!(errors.iter().any(|e| e.contains("invalid email")));
    }
}
