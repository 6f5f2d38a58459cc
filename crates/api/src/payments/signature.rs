//! Webhook signature verification.
//!
//! Deliveries carry a `Stripe-Signature: t=<unix>,v1=<hex>` header where the
//! `v1` value is HMAC-SHA256 over `"<t>.<raw body>"` keyed with the endpoint
//! secret. A header may carry several `v1` entries during secret rotation;
//! any one matching is enough.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument};

use super::event::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Errors that can occur while authenticating a webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The signature header is missing.
    #[error("missing signature header")]
    MissingSignature,

    /// The signature header is malformed, stale, or does not match.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The body is authentic but is not a webhook event.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Verifies webhook deliveries against the shared endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    /// Create a verifier accepting timestamps within `tolerance_secs` of now.
    #[must_use]
    pub const fn new(secret: SecretString, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Verify the signature and decode the event, using the current time.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::InvalidSignature` if the header does not
    /// authenticate the payload, and `WebhookError::InvalidPayload` if the
    /// authentic payload is not an event.
    pub fn construct_event(
        &self,
        payload: &[u8],
        header: Option<&str>,
    ) -> Result<WebhookEvent, WebhookError> {
        self.construct_event_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Same as [`Self::construct_event`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::construct_event`].
    #[instrument(skip(self, payload, header))]
    pub fn construct_event_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<WebhookEvent, WebhookError> {
        let header = header.ok_or(WebhookError::MissingSignature)?;
        self.verify(payload, header, now)?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        debug!(event_id = %event.id, event_type = %event.event_type, "Webhook verified");

        Ok(event)
    }

    /// Check `header` against `payload` at time `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::InvalidSignature` on any mismatch.
    pub fn verify(&self, payload: &[u8], header: &str, now: i64) -> Result<(), WebhookError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            WebhookError::InvalidSignature("missing or invalid timestamp".to_string())
        })?;

        if signatures.is_empty() {
            return Err(WebhookError::InvalidSignature(
                "no v1 signature".to_string(),
            ));
        }

        if now.abs_diff(timestamp) > self.tolerance_secs.unsigned_abs() {
            return Err(WebhookError::InvalidSignature(
                "timestamp outside tolerance".to_string(),
            ));
        }

        let expected = compute_signature(self.secret.expose_secret(), payload, timestamp)
            .map_err(WebhookError::InvalidSignature)?;

        if signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature(
                "signature mismatch".to_string(),
            ))
        }
    }
}

/// Build a `Stripe-Signature` header value for `payload` at `timestamp`.
///
/// Used by the test suites to produce authentic deliveries.
///
/// # Errors
///
/// Returns an error message if the key cannot be used for HMAC.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> Result<String, String> {
    let signature = compute_signature(secret, payload, timestamp)?;
    Ok(format!("t={timestamp},v1={signature}"))
}

fn compute_signature(secret: &str, payload: &[u8], timestamp: i64) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| e.to_string())?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
