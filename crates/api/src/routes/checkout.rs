//! Checkout route handler.

use axum::{Json, extract::State};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::models::CartItem;
use crate::state::AppState;

/// Body of `POST /api/create-checkout-session`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub cart: Vec<CartItem>,
    /// Caller-supplied user reference, carried through the provider verbatim.
    #[serde(alias = "user_id", deserialize_with = "user_ref")]
    pub user_id: String,
}

/// Response with the hosted checkout URL.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Accept the user reference as a JSON string or number.
fn user_ref<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// Open a hosted checkout for the submitted cart.
///
/// POST /api/create-checkout-session
#[tracing::instrument(skip(state, request), fields(user_ref = %request.user_id))]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let created = state
        .checkout()
        .create_checkout_session(&request.cart, &request.user_id)
        .await?;

    Ok(Json(CheckoutResponse { url: created.url }))
}
