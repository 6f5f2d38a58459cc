//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::{CheckoutConfig, StripeConfig};
use crate::db::Stores;
use crate::payments::{PaymentGateway, WebhookVerifier};
use crate::services::{AuthService, CheckoutService, OrderQueryService, WebhookReconciler};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and is assembled once at
/// startup from explicit components; handlers reach the services through it.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    stores: Stores,
    auth: AuthService,
    checkout: CheckoutService,
    reconciler: WebhookReconciler,
    orders: OrderQueryService,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `stores` - Store handles (`PostgreSQL` or in-memory)
    /// * `gateway` - Payment provider client
    /// * `stripe` - Provider settings (webhook secret and tolerance)
    /// * `checkout` - Currency and redirect URLs for hosted checkouts
    #[must_use]
    pub fn new(
        stores: Stores,
        gateway: Arc<dyn PaymentGateway>,
        stripe: &StripeConfig,
        checkout: CheckoutConfig,
    ) -> Self {
        let verifier =
            WebhookVerifier::new(stripe.webhook_secret.clone(), stripe.webhook_tolerance_secs);

        Self {
            inner: Arc::new(AppStateInner {
                auth: AuthService::new(Arc::clone(&stores.users)),
                checkout: CheckoutService::new(
                    Arc::clone(&stores.products),
                    Arc::clone(&stores.checkouts),
                    Arc::clone(&gateway),
                    checkout,
                ),
                reconciler: WebhookReconciler::new(verifier, gateway, &stores),
                orders: OrderQueryService::new(&stores),
                stores,
            }),
        }
    }

    /// Get a reference to the store handles.
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    /// Get a reference to the authentication service.
    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    /// Get a reference to the checkout session manager.
    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    /// Get a reference to the webhook reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &WebhookReconciler {
        &self.inner.reconciler
    }

    /// Get a reference to the order query service.
    #[must_use]
    pub fn orders(&self) -> &OrderQueryService {
        &self.inner.orders
    }
}
