//! Stripe REST client for hosted Checkout sessions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error, instrument};

use super::{CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentGateway};
use crate::config::StripeConfig;

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Request` if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base)
    }

    async fn api_error(response: reqwest::Response) -> PaymentError {
        let status = response.status().as_u16();
        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) => body
                .error
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
            Err(e) => e.to_string(),
        };
        PaymentError::Api { status, message }
    }
}

/// Form fields for `POST /v1/checkout/sessions`.
///
/// Stripe expects nested parameters in bracket notation, e.g.
/// `line_items[0][price_data][unit_amount]`.
pub(crate) fn session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
        form.push((
            format!("{prefix}[price_data][currency]"),
            item.currency.to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount.to_string(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.name.clone(),
        ));
    }

    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }

    form
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let response = self
            .client
            .post(self.sessions_url())
            .bearer_auth(self.secret_key.expose_secret())
            .form(&session_form(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::api_error(response).await;
            error!(error = %err, "Stripe rejected checkout session");
            return Err(err);
        }

        let session: CheckoutSession = response.json().await?;
        debug!(session_id = %session.id, "Checkout session created");

        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, PaymentError> {
        let mut url = url::Url::parse(&self.sessions_url())
            .map_err(|e| PaymentError::Request(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| PaymentError::Request("invalid API base".to_string()))?
            .push(session_id);

        let response = self
            .client
            .get(url)
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let err = Self::api_error(response).await;
            error!(error = %err, "Stripe session retrieval failed");
            return Err(err);
        }

        Ok(Some(response.json().await?))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use webshop_core::CurrencyCode;

    use super::*;
    use crate::payments::LineItem;

    fn field<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
        form.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_session_form_encodes_lines_and_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), "a@x.com".to_string());
        metadata.insert("product_1".to_string(), "7,2".to_string());

        let request = CheckoutSessionRequest {
            line_items: vec![LineItem {
                name: "Green tea".to_string(),
                unit_amount: 4990,
                currency: CurrencyCode::default(),
                quantity: 2,
            }],
            metadata,
            success_url: "http://localhost:3000/profile/vieworders".to_string(),
            cancel_url: "http://localhost:3000/shoppingcart".to_string(),
        };

        let form = session_form(&request);

        assert_eq!(field(&form, "mode"), Some("payment"));
        assert_eq!(field(&form, "payment_method_types[0]"), Some("card"));
        assert_eq!(field(&form, "line_items[0][quantity]"), Some("2"));
        assert_eq!(
            field(&form, "line_items[0][price_data][unit_amount]"),
            Some("4990")
        );
        assert_eq!(
            field(&form, "line_items[0][price_data][currency]"),
            Some("nok")
        );
        assert_eq!(
            field(&form, "line_items[0][price_data][product_data][name]"),
            Some("Green tea")
        );
        assert_eq!(field(&form, "metadata[user_id]"), Some("a@x.com"));
        assert_eq!(field(&form, "metadata[product_1]"), Some("7,2"));
        assert_eq!(
            field(&form, "success_url"),
            Some("http://localhost:3000/profile/vieworders")
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let client = StripeClient::new(&StripeConfig {
            secret_key: SecretString::from("sk_test_should_not_leak".to_string()),
            webhook_secret: SecretString::from("whsec_should_not_leak".to_string()),
            api_base: "https://api.stripe.com/".to_string(),
            webhook_tolerance_secs: 300,
            timeout_secs: 10,
        });
        let Ok(client) = client else {
            panic!("client should build");
        };

        let debug = format!("{client:?}");
        assert!(!debug.contains("sk_test_should_not_leak"));
        assert!(debug.contains("https://api.stripe.com"));
    }
}
