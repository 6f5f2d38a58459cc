//! Checkout session manager.
//!
//! Turns a submitted cart into a hosted payment session and records the
//! session in the pending-checkout registry so the webhook can find it later.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use webshop_core::{MoneyError, ProductId, to_minor_units};

use crate::config::CheckoutConfig;
use crate::db::{CheckoutStore, ProductStore, RepositoryError};
use crate::models::{CartItem, PendingCheckout, Product};
use crate::payments::{CheckoutSessionRequest, LineItem, PaymentError, PaymentGateway};

/// Metadata key holding the buyer's user identifier.
pub const USER_ID_KEY: &str = "user_id";

/// Prefix of the per-line metadata keys (`product_1`, `product_2`, …).
pub const PRODUCT_KEY_PREFIX: &str = "product_";

/// Errors that can occur while opening a checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// No cart item matched a catalog product.
    #[error("cart contains no purchasable products")]
    EmptyCart,

    /// A cart quantity cannot be recorded as an order line.
    #[error("quantity {1} for product {0} is too large")]
    QuantityTooLarge(ProductId, u32),

    /// A catalog price cannot be charged.
    #[error("invalid price for product {0}: {1}")]
    Price(ProductId, MoneyError),

    /// The payment provider rejected or failed the request.
    #[error("payment provider error: {0}")]
    Gateway(#[from] PaymentError),

    /// The provider created a session without a redirect URL.
    #[error("checkout session {0} has no redirect url")]
    MissingUrl(String),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// A hosted checkout ready for the buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCheckout {
    pub session_id: String,
    pub url: String,
}

/// Creates hosted checkout sessions from carts.
#[derive(Clone)]
pub struct CheckoutService {
    products: Arc<dyn ProductStore>,
    checkouts: Arc<dyn CheckoutStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: CheckoutConfig,
}

impl CheckoutService {
    /// Create a new checkout service.
    #[must_use]
    pub fn new(
        products: Arc<dyn ProductStore>,
        checkouts: Arc<dyn CheckoutStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            products,
            checkouts,
            gateway,
            config,
        }
    }

    /// Open a hosted checkout for `cart` on behalf of `user_ref`.
    ///
    /// Unknown products and zero quantities are left out of the charged
    /// lines. Nothing reaches the provider when no line is left.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::QuantityTooLarge` if a quantity exceeds what an
    /// order line can hold, `CheckoutError::EmptyCart` if no item resolves,
    /// `CheckoutError::Gateway` if the provider call fails, and
    /// `CheckoutError::Repository` if the catalog or registry is unavailable.
    #[instrument(skip(self, cart), fields(items = cart.len()))]
    pub async fn create_checkout_session(
        &self,
        cart: &[CartItem],
        user_ref: &str,
    ) -> Result<CreatedCheckout, CheckoutError> {
        if let Some(item) = cart.iter().find(|item| i32::try_from(item.quantity).is_err()) {
            return Err(CheckoutError::QuantityTooLarge(item.product_id, item.quantity));
        }

        let mut resolved = Vec::with_capacity(cart.len());
        for item in cart.iter().filter(|item| item.quantity > 0) {
            match self.products.find_by_id(item.product_id).await? {
                Some(product) => resolved.push((product, item.quantity)),
                None => warn!(product_id = %item.product_id, "Dropping unknown product from cart"),
            }
        }

        let request = build_session_request(cart, &resolved, user_ref, &self.config)?;
        let session = self.gateway.create_checkout_session(&request).await?;

        let url = session
            .url
            .clone()
            .ok_or_else(|| CheckoutError::MissingUrl(session.id.clone()))?;

        self.checkouts
            .insert(&PendingCheckout {
                session_id: session.id.clone(),
                user_ref: user_ref.to_string(),
                cart: cart.to_vec(),
                created_at: Utc::now(),
                completed_order_id: None,
            })
            .await?;

        info!(
            session_id = %session.id,
            lines = request.line_items.len(),
            amount = request.total_amount(),
            "Checkout session created"
        );

        Ok(CreatedCheckout {
            session_id: session.id,
            url,
        })
    }
}

/// Build the provider request for a cart.
///
/// `resolved` holds the catalog products that matched cart items, with their
/// quantities. Metadata lists every submitted cart line, resolved or not, so
/// the webhook sees the cart exactly as it was sent.
///
/// # Errors
///
/// Returns `CheckoutError::EmptyCart` if `resolved` is empty and
/// `CheckoutError::Price` for prices that cannot be charged.
pub fn build_session_request(
    cart: &[CartItem],
    resolved: &[(Product, u32)],
    user_ref: &str,
    config: &CheckoutConfig,
) -> Result<CheckoutSessionRequest, CheckoutError> {
    if resolved.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let line_items = resolved
        .iter()
        .map(|(product, quantity)| {
            let unit_amount =
                to_minor_units(product.price).map_err(|e| CheckoutError::Price(product.id, e))?;
            Ok(LineItem {
                name: product.name.clone(),
                unit_amount,
                currency: config.currency.clone(),
                quantity: *quantity,
            })
        })
        .collect::<Result<Vec<_>, CheckoutError>>()?;

    let mut metadata = BTreeMap::new();
    metadata.insert(USER_ID_KEY.to_string(), user_ref.to_string());
    for (i, item) in cart.iter().enumerate() {
        metadata.insert(
            format!("{PRODUCT_KEY_PREFIX}{}", i + 1),
            format!("{},{}", item.product_id, item.quantity),
        );
    }

    Ok(CheckoutSessionRequest {
        line_items,
        metadata,
        success_url: config.success_url.clone(),
        cancel_url: config.cancel_url.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::*;
    use crate::db::MemoryStore;
    use crate::payments::FakeGateway;

    fn item(id: i32, quantity: u32) -> CartItem {
        CartItem {
            product_id: ProductId::new(id),
            quantity,
        }
    }

    fn product(id: i32, price: &str) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            price: Decimal::from_str(price).unwrap(),
        }
    }

    async fn service() -> (CheckoutService, MemoryStore, FakeGateway) {
        let store = MemoryStore::new();
        store.put_product(1, "Green tea", Decimal::from_str("49.90").unwrap()).await;
        store.put_product(2, "Teapot", Decimal::from(300)).await;
        let gateway = FakeGateway::new();
        let service = CheckoutService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            CheckoutConfig::default(),
        );
        (service, store, gateway)
    }

    #[test]
    fn test_build_request_lines_and_metadata() {
        let cart = [item(1, 2), item(99, 1), item(2, 1)];
        let resolved = [(product(1, "49.90"), 2), (product(2, "300"), 1)];

        let request =
            build_session_request(&cart, &resolved, "a@x.com", &CheckoutConfig::default())
                .unwrap();

        assert_eq!(request.line_items.len(), 2);
        assert_eq!(request.line_items[0].unit_amount, 4990);
        assert_eq!(request.line_items[0].currency.as_str(), "nok");
        assert_eq!(request.total_amount(), 4990 * 2 + 30_000);

        assert_eq!(request.metadata.get("user_id").unwrap(), "a@x.com");
        assert_eq!(request.metadata.get("product_1").unwrap(), "1,2");
        assert_eq!(request.metadata.get("product_2").unwrap(), "99,1");
        assert_eq!(request.metadata.get("product_3").unwrap(), "2,1");
        assert_eq!(
            request.success_url,
            "http://localhost:3000/profile/vieworders"
        );
        assert_eq!(request.cancel_url, "http://localhost:3000/shoppingcart");
    }

    #[test]
    fn test_build_request_rejects_empty() {
        let result =
            build_session_request(&[item(99, 1)], &[], "a@x.com", &CheckoutConfig::default());
        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
    }

    #[test]
    fn test_build_request_rejects_negative_price() {
        let resolved = [(product(1, "-1"), 1)];
        let result =
            build_session_request(&[item(1, 1)], &resolved, "a@x.com", &CheckoutConfig::default());
        assert!(matches!(result, Err(CheckoutError::Price(_, _))));
    }

    #[tokio::test]
    async fn test_create_records_pending_checkout() {
        let (service, store, gateway) = service().await;
        let cart = [item(1, 2), item(2, 1)];

        let created = service
            .create_checkout_session(&cart, "a@x.com")
            .await
            .unwrap();

        assert!(created.url.contains(&created.session_id));
        let pending = store
            .find_by_session_id(&created.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.user_ref, "a@x.com");
        assert_eq!(pending.cart, cart.to_vec());
        assert!(!pending.is_completed());
        assert_eq!(gateway.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_products_do_not_change_total() {
        let (service, _store, gateway) = service().await;

        service
            .create_checkout_session(&[item(1, 2), item(2, 1)], "a@x.com")
            .await
            .unwrap();
        service
            .create_checkout_session(&[item(1, 2), item(42, 5), item(2, 1), item(43, 1)], "a@x.com")
            .await
            .unwrap();

        let requests = gateway.requests().await;
        assert_eq!(requests[0].total_amount(), requests[1].total_amount());
        assert_eq!(requests[0].total_amount(), 4990 * 2 + 30_000);
    }

    #[tokio::test]
    async fn test_zero_quantity_is_dropped() {
        let (service, _store, gateway) = service().await;

        let result = service.create_checkout_session(&[item(1, 0)], "a@x.com").await;

        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
        assert!(gateway.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_quantity_beyond_order_line_range_is_rejected() {
        let (service, store, gateway) = service().await;
        let too_many = u32::try_from(i32::MAX).unwrap() + 1;

        let result = service
            .create_checkout_session(&[item(2, 1), item(1, too_many)], "a@x.com")
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::QuantityTooLarge(id, q)) if id == ProductId::new(1) && q == too_many
        ));
        assert!(gateway.requests().await.is_empty());
        assert!(store.find_by_session_id("cs_test_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_largest_order_line_quantity_is_accepted() {
        let (service, _store, gateway) = service().await;
        let most = u32::try_from(i32::MAX).unwrap();

        service
            .create_checkout_session(&[item(1, most)], "a@x.com")
            .await
            .unwrap();

        let requests = gateway.requests().await;
        assert_eq!(requests[0].metadata.get("product_1").unwrap(), &format!("1,{most}"));
    }

    #[tokio::test]
    async fn test_empty_cart_never_reaches_gateway() {
        let (service, _store, gateway) = service().await;

        let result = service.create_checkout_session(&[item(77, 1)], "a@x.com").await;

        assert!(matches!(result, Err(CheckoutError::EmptyCart)));
        assert!(gateway.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_failure_records_nothing() {
        let (service, store, gateway) = service().await;
        gateway.fail_create(true).await;

        let result = service.create_checkout_session(&[item(1, 1)], "a@x.com").await;

        assert!(matches!(result, Err(CheckoutError::Gateway(_))));
        assert!(store.find_by_session_id("cs_test_1").await.unwrap().is_none());
    }
}
