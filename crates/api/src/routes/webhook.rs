//! Payment provider webhook handler.
//!
//! The body is taken as raw bytes: the signature covers the exact payload,
//! so it must be verified before any JSON parsing.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::error::Result;
use crate::services::ReconcileOutcome;
use crate::state::AppState;

/// Header carrying the provider signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Receive a webhook delivery.
///
/// POST /api/webhook
///
/// Every outcome that is not an error is acknowledged with 200 so the
/// provider stops redelivering.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.reconciler().handle_delivery(&body, signature).await?;

    match &outcome {
        ReconcileOutcome::Applied { order_id, line_count } => {
            tracing::info!(%order_id, line_count, "Webhook applied");
        }
        ReconcileOutcome::AlreadyApplied { order_id } => {
            tracing::info!(%order_id, "Webhook redelivery acknowledged");
        }
        ReconcileOutcome::Ignored => tracing::debug!("Webhook event ignored"),
        skipped => tracing::warn!(outcome = ?skipped, "Webhook skipped"),
    }

    Ok(StatusCode::OK)
}
