//! Payment provider integration.
//!
//! # Architecture
//!
//! - [`PaymentGateway`] is the seam between the checkout/webhook services and
//!   the provider. Services hold an `Arc<dyn PaymentGateway>`.
//! - [`StripeClient`] talks to the Stripe REST API directly with `reqwest`
//!   (form-encoded requests, JSON responses).
//! - [`FakeGateway`] records requests in memory for tests.
//! - [`WebhookVerifier`] authenticates inbound webhook deliveries.
//!
//! The provider is the only authority on payment state; nothing here retries.

mod event;
pub mod fake;
mod signature;
mod stripe;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use webshop_core::CurrencyCode;

pub use event::{CHECKOUT_SESSION_COMPLETED, WebhookEvent};
pub use fake::FakeGateway;
pub use signature::{WebhookError, WebhookVerifier, sign_payload};
pub use stripe::StripeClient;

/// Errors that can occur when talking to the payment provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The HTTP request could not be sent or timed out.
    #[error("request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("provider error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The provider's response could not be decoded.
    #[error("invalid response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Response(e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// One priced line of a hosted checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    /// Product display name.
    pub name: String,
    /// Price per unit in minor currency units.
    pub unit_amount: i64,
    pub currency: CurrencyCode,
    pub quantity: u32,
}

impl LineItem {
    /// Unit amount times quantity, in minor units, saturating at the `i64`
    /// bounds.
    #[must_use]
    pub fn amount(&self) -> i64 {
        self.unit_amount.saturating_mul(i64::from(self.quantity))
    }
}

/// Everything needed to open a hosted card-payment checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<LineItem>,
    /// Opaque key/value pairs echoed back on the session.
    pub metadata: BTreeMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutSessionRequest {
    /// Sum of all line amounts, in minor units, saturating at the `i64`
    /// bounds.
    #[must_use]
    pub fn total_amount(&self) -> i64 {
        self.line_items
            .iter()
            .map(LineItem::amount)
            .fold(0, i64::saturating_add)
    }
}

/// A provider-owned checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// Redirect URL. Absent once the session is no longer payable.
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Hosted checkout operations the shop needs from a provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a new hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    /// Fetch a session by id. `Ok(None)` when the provider does not know it.
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, PaymentError>;
}
