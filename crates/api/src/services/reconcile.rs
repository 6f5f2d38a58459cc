//! Webhook reconciler.
//!
//! Mirrors completed hosted checkouts into local orders. The provider stays the
//! authority on payment state: the session named in the event is fetched back
//! from the provider and its metadata, not the event body, decides what gets
//! written.
//!
//! # Outcomes
//!
//! Every delivery that is authentic and refers to a session the provider
//! knows is acknowledged, whether or not it produced an order. Skips are
//! reported as [`ReconcileOutcome`] variants and logged; only failures that a
//! retry could fix are errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use webshop_core::{Email, OrderId, OrderStatus, ProductId};

use super::checkout::{PRODUCT_KEY_PREFIX, USER_ID_KEY};
use crate::db::{CheckoutStore, OrderStore, ProductStore, RepositoryError, Stores, UserStore};
use crate::models::{CartItem, NewOrder, NewOrderLine};
use crate::payments::{PaymentError, PaymentGateway, WebhookError, WebhookEvent, WebhookVerifier};

/// Result of handling one authentic webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// An order and its lines were written.
    Applied { order_id: OrderId, line_count: usize },
    /// The metadata user does not exist; nothing was written.
    SkippedUnknownUser,
    /// The session names a different user than the checkout was opened
    /// for; nothing was written.
    SkippedUserMismatch,
    /// No metadata line resolved to a product; nothing was written.
    SkippedNoLines,
    /// The session was not opened by this shop; nothing was written.
    SkippedUnknownSession,
    /// The session was already turned into an order (redelivery).
    AlreadyApplied { order_id: OrderId },
    /// The event type needs no action.
    Ignored,
}

/// Errors that can occur while reconciling a delivery.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Signature or payload rejected.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// A checkout event without a session id.
    #[error("event {0} carries no session id")]
    MissingSessionId(String),

    /// The provider does not know the session named in the event.
    #[error("checkout session {0} not found")]
    SessionNotFound(String),

    /// The provider could not be reached.
    #[error("payment provider error: {0}")]
    Gateway(#[from] PaymentError),

    /// Repository/database error.
    #[error("database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Cart contents recovered from session metadata.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SessionMetadata<'a> {
    pub user_ref: Option<&'a str>,
    /// `(product, quantity)` in cart order. Malformed entries are dropped.
    pub items: Vec<(ProductId, i32)>,
}

/// Parse `user_id` and every `product_<n>` entry.
///
/// Values must be exactly `"<productId>,<quantity>"` with a positive
/// quantity; anything else is skipped.
#[must_use]
pub fn parse_metadata(metadata: &BTreeMap<String, String>) -> SessionMetadata<'_> {
    let mut entries: Vec<(u32, &str)> = metadata
        .iter()
        .filter_map(|(key, value)| {
            let index = key.strip_prefix(PRODUCT_KEY_PREFIX)?;
            Some((index.parse().unwrap_or(u32::MAX), value.as_str()))
        })
        .collect();
    entries.sort_by_key(|(index, _)| *index);

    let items = entries
        .into_iter()
        .filter_map(|(_, value)| {
            let (product, quantity) = value.split_once(',')?;
            let product = product.parse::<ProductId>().ok()?;
            let quantity = quantity.parse::<i32>().ok().filter(|q| *q > 0)?;
            Some((product, quantity))
        })
        .collect();

    SessionMetadata {
        user_ref: metadata.get(USER_ID_KEY).map(String::as_str),
        items,
    }
}

/// Whether parsed metadata lines are exactly the recorded cart's non-empty
/// lines, in order.
fn cart_matches(cart: &[CartItem], items: &[(ProductId, i32)]) -> bool {
    let recorded = cart
        .iter()
        .filter(|item| item.quantity > 0)
        .map(|item| (item.product_id, i32::try_from(item.quantity).ok()));
    recorded.eq(items.iter().map(|(id, quantity)| (*id, Some(*quantity))))
}

/// Turns checkout-completed events into orders.
#[derive(Clone)]
pub struct WebhookReconciler {
    verifier: WebhookVerifier,
    gateway: Arc<dyn PaymentGateway>,
    products: Arc<dyn ProductStore>,
    users: Arc<dyn UserStore>,
    orders: Arc<dyn OrderStore>,
    checkouts: Arc<dyn CheckoutStore>,
}

impl WebhookReconciler {
    /// Create a reconciler over the given stores.
    #[must_use]
    pub fn new(verifier: WebhookVerifier, gateway: Arc<dyn PaymentGateway>, stores: &Stores) -> Self {
        Self {
            verifier,
            gateway,
            products: Arc::clone(&stores.products),
            users: Arc::clone(&stores.users),
            orders: Arc::clone(&stores.orders),
            checkouts: Arc::clone(&stores.checkouts),
        }
    }

    /// Authenticate a raw delivery and apply it.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Webhook` for unauthentic or unparseable
    /// deliveries; see [`Self::apply_event`] for the rest.
    pub async fn handle_delivery(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let event = self.verifier.construct_event(payload, signature)?;
        self.apply_event(&event).await
    }

    /// Apply an authenticated event.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::SessionNotFound` if the provider does not know
    /// the session, `ReconcileError::Gateway` if it cannot be asked, and
    /// `ReconcileError::Repository` if the stores fail.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn apply_event(
        &self,
        event: &WebhookEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if !event.is_checkout_completed() {
            info!("Ignoring event");
            return Ok(ReconcileOutcome::Ignored);
        }

        let session_id = event
            .object_id()
            .ok_or_else(|| ReconcileError::MissingSessionId(event.id.clone()))?;

        let Some(pending) = self.checkouts.find_by_session_id(session_id).await? else {
            warn!(session_id, "Completed session was not opened by this shop");
            return Ok(ReconcileOutcome::SkippedUnknownSession);
        };

        if let Some(order_id) = pending.completed_order_id {
            info!(session_id, %order_id, "Session already reconciled");
            return Ok(ReconcileOutcome::AlreadyApplied { order_id });
        }

        let session = self
            .gateway
            .retrieve_checkout_session(session_id)
            .await?
            .ok_or_else(|| ReconcileError::SessionNotFound(session_id.to_string()))?;

        let metadata = parse_metadata(&session.metadata);

        let Some(user) = self.resolve_user(metadata.user_ref).await? else {
            warn!(session_id, user_ref = ?metadata.user_ref, "Skipping session for unknown user");
            return Ok(ReconcileOutcome::SkippedUnknownUser);
        };

        if metadata.user_ref != Some(pending.user_ref.as_str()) {
            warn!(
                session_id,
                user_ref = ?metadata.user_ref,
                checkout_user_ref = %pending.user_ref,
                "Skipping session whose user differs from the checkout"
            );
            return Ok(ReconcileOutcome::SkippedUserMismatch);
        }

        if !cart_matches(&pending.cart, &metadata.items) {
            warn!(
                session_id,
                cart_lines = pending.cart.len(),
                metadata_lines = metadata.items.len(),
                "Session lines differ from the recorded cart"
            );
        }

        let mut lines = Vec::with_capacity(metadata.items.len());
        for (product_id, quantity) in metadata.items {
            match self.products.find_by_id(product_id).await? {
                Some(product) => lines.push(NewOrderLine {
                    product_id,
                    quantity,
                    unit_price: product.price,
                }),
                None => warn!(session_id, %product_id, "Dropping unknown product"),
            }
        }

        if lines.is_empty() {
            warn!(session_id, "Skipping session without resolvable products");
            return Ok(ReconcileOutcome::SkippedNoLines);
        }

        let order = NewOrder {
            order_date: Utc::now(),
            user_id: user.id,
            status: OrderStatus::Paid,
            lines,
            checkout_session_id: Some(session_id.to_string()),
        };

        match self.orders.create(order).await {
            Ok((order, lines)) => {
                info!(session_id, order_id = %order.id, lines = lines.len(), "Order created from checkout");
                Ok(ReconcileOutcome::Applied {
                    order_id: order.id,
                    line_count: lines.len(),
                })
            }
            Err(RepositoryError::Conflict(reason)) => {
                // A concurrent delivery completed the session first.
                let completed = self
                    .checkouts
                    .find_by_session_id(session_id)
                    .await?
                    .and_then(|pending| pending.completed_order_id);
                match completed {
                    Some(order_id) => {
                        info!(session_id, %order_id, "Session reconciled concurrently");
                        Ok(ReconcileOutcome::AlreadyApplied { order_id })
                    }
                    None => Err(RepositoryError::Conflict(reason).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_user(
        &self,
        user_ref: Option<&str>,
    ) -> Result<Option<crate::models::User>, RepositoryError> {
        let Some(email) = user_ref.and_then(|r| Email::parse(r).ok()) else {
            return Ok(None);
        };
        self.users.find_by_email(&email).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::PendingCheckout;
    use crate::payments::{CheckoutSession, FakeGateway, sign_payload};

    const SECRET: &str = "whsec_unit_test";

    fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn completed_event(session_id: &str) -> Vec<u8> {
        format!(
            r#"{{"id":"evt_{session_id}","type":"checkout.session.completed","data":{{"object":{{"id":"{session_id}"}}}}}}"#
        )
        .into_bytes()
    }

    struct Harness {
        store: MemoryStore,
        gateway: FakeGateway,
        reconciler: WebhookReconciler,
    }

    impl Harness {
        async fn new() -> Self {
            let store = MemoryStore::new();
            store.put_user(&Email::parse("a@x.com").unwrap()).await;
            store.put_product(1, "Green tea", Decimal::from_str("49.90").unwrap()).await;
            store.put_product(2, "Teapot", Decimal::from(300)).await;
            let gateway = FakeGateway::new();
            let reconciler = WebhookReconciler::new(
                WebhookVerifier::new(SecretString::from(SECRET.to_string()), 300),
                Arc::new(gateway.clone()),
                &Stores::memory(&store),
            );
            Self {
                store,
                gateway,
                reconciler,
            }
        }

        async fn session(&self, id: &str, metadata: &[(&str, &str)]) {
            self.gateway
                .put_session(CheckoutSession {
                    id: id.to_string(),
                    url: None,
                    metadata: meta(metadata),
                })
                .await;
            self.store
                .insert(&PendingCheckout {
                    session_id: id.to_string(),
                    user_ref: "a@x.com".to_string(),
                    cart: vec![CartItem {
                        product_id: ProductId::new(1),
                        quantity: 1,
                    }],
                    created_at: Utc::now(),
                    completed_order_id: None,
                })
                .await
                .unwrap();
        }

        async fn deliver(&self, session_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
            let body = completed_event(session_id);
            let header = sign_payload(SECRET, &body, Utc::now().timestamp()).unwrap();
            self.reconciler.handle_delivery(&body, Some(&header)).await
        }
    }

    #[test]
    fn test_parse_metadata() {
        let metadata = meta(&[
            ("user_id", "a@x.com"),
            ("product_1", "1,2"),
            ("product_2", "abc,1"),
            ("product_3", "2"),
            ("product_4", "2,0"),
            ("product_10", "2,3"),
            ("unrelated", "9,9"),
        ]);

        let parsed = parse_metadata(&metadata);

        assert_eq!(parsed.user_ref, Some("a@x.com"));
        assert_eq!(
            parsed.items,
            vec![(ProductId::new(1), 2), (ProductId::new(2), 3)]
        );
    }

    #[test]
    fn test_cart_matches_metadata_lines() {
        let cart = [
            CartItem { product_id: ProductId::new(1), quantity: 2 },
            CartItem { product_id: ProductId::new(9), quantity: 0 },
            CartItem { product_id: ProductId::new(2), quantity: 1 },
        ];

        assert!(cart_matches(&cart, &[(ProductId::new(1), 2), (ProductId::new(2), 1)]));
        assert!(!cart_matches(&cart, &[(ProductId::new(1), 5), (ProductId::new(2), 1)]));
        assert!(!cart_matches(&cart, &[(ProductId::new(1), 2)]));
    }

    #[test]
    fn test_parse_metadata_without_user() {
        let metadata = meta(&[("product_1", "1,1")]);
        let parsed = parse_metadata(&metadata);
        assert_eq!(parsed.user_ref, None);
        assert_eq!(parsed.items.len(), 1);
    }

    #[tokio::test]
    async fn test_applied_prices_at_processing_time() {
        let h = Harness::new().await;
        h.session("cs_1", &[("user_id", "a@x.com"), ("product_1", "1,2"), ("product_2", "2,1")])
            .await;
        h.store.set_price(ProductId::new(1), Decimal::from(55)).await;

        let outcome = h.deliver("cs_1").await.unwrap();

        let ReconcileOutcome::Applied { order_id, line_count } = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(line_count, 2);
        let lines = h.store.find_lines_by_order(order_id).await.unwrap();
        assert_eq!(lines[0].unit_price, Decimal::from(55));
        assert_eq!(lines[0].quantity, 2);
        let order = OrderStore::find_by_id(&h.store, order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_redelivery_is_acknowledged_once() {
        let h = Harness::new().await;
        h.session("cs_1", &[("user_id", "a@x.com"), ("product_1", "1,1")]).await;

        let first = h.deliver("cs_1").await.unwrap();
        let second = h.deliver("cs_1").await.unwrap();

        let ReconcileOutcome::Applied { order_id, .. } = first else {
            panic!("expected Applied, got {first:?}");
        };
        assert_eq!(second, ReconcileOutcome::AlreadyApplied { order_id });
        assert_eq!(h.store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_session_user_must_match_checkout() {
        let h = Harness::new().await;
        h.store.put_user(&Email::parse("b@x.com").unwrap()).await;
        h.session("cs_1", &[("user_id", "b@x.com"), ("product_1", "1,1")]).await;

        assert_eq!(
            h.deliver("cs_1").await.unwrap(),
            ReconcileOutcome::SkippedUserMismatch
        );
        assert_eq!(h.store.order_count().await, 0);
        assert!(
            h.store
                .find_by_session_id("cs_1")
                .await
                .unwrap()
                .is_some_and(|pending| !pending.is_completed())
        );
    }

    #[tokio::test]
    async fn test_unknown_user_writes_nothing() {
        let h = Harness::new().await;
        h.session("cs_1", &[("user_id", "ghost@x.com"), ("product_1", "1,1")]).await;

        assert_eq!(
            h.deliver("cs_1").await.unwrap(),
            ReconcileOutcome::SkippedUnknownUser
        );
        assert_eq!(h.store.order_count().await, 0);
        assert_eq!(h.store.line_count().await, 0);
    }

    #[tokio::test]
    async fn test_no_resolvable_lines_writes_nothing() {
        let h = Harness::new().await;
        h.session("cs_1", &[("user_id", "a@x.com"), ("product_1", "404,1")]).await;

        assert_eq!(
            h.deliver("cs_1").await.unwrap(),
            ReconcileOutcome::SkippedNoLines
        );
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_other_event_types_are_ignored() {
        let h = Harness::new().await;
        let body = br#"{"id":"evt_1","type":"payment_intent.created","data":{"object":{"id":"pi_1"}}}"#;
        let header = sign_payload(SECRET, body, Utc::now().timestamp()).unwrap();

        let outcome = h.reconciler.handle_delivery(body, Some(&header)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert_eq!(h.gateway.retrievals().await, 0);
    }

    #[tokio::test]
    async fn test_session_unknown_to_provider() {
        let h = Harness::new().await;
        h.session("cs_1", &[("user_id", "a@x.com"), ("product_1", "1,1")]).await;
        h.store
            .insert(&PendingCheckout {
                session_id: "cs_gone".to_string(),
                user_ref: "a@x.com".to_string(),
                cart: Vec::new(),
                created_at: Utc::now(),
                completed_order_id: None,
            })
            .await
            .unwrap();

        let result = h.deliver("cs_gone").await;

        assert!(matches!(result, Err(ReconcileError::SessionNotFound(_))));
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_session_not_opened_here() {
        let h = Harness::new().await;

        assert_eq!(
            h.deliver("cs_foreign").await.unwrap(),
            ReconcileOutcome::SkippedUnknownSession
        );
        assert_eq!(h.gateway.retrievals().await, 0);
    }

    #[tokio::test]
    async fn test_provider_outage_writes_nothing() {
        let h = Harness::new().await;
        h.session("cs_1", &[("user_id", "a@x.com"), ("product_1", "1,1")]).await;
        h.gateway.fail_retrieve(true).await;

        let result = h.deliver("cs_1").await;

        assert!(matches!(result, Err(ReconcileError::Gateway(_))));
        assert_eq!(h.store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_tampered_delivery_rejected() {
        let h = Harness::new().await;
        h.session("cs_1", &[("user_id", "a@x.com"), ("product_1", "1,1")]).await;
        let body = completed_event("cs_1");
        let header = sign_payload(SECRET, &body, Utc::now().timestamp()).unwrap();
        let tampered = completed_event("cs_2");

        let result = h.reconciler.handle_delivery(&tampered, Some(&header)).await;

        assert!(matches!(
            result,
            Err(ReconcileError::Webhook(WebhookError::InvalidSignature(_)))
        ));
        assert_eq!(h.store.order_count().await, 0);
    }
}
