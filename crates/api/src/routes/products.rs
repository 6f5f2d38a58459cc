//! Catalog route handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use webshop_core::ProductId;

use crate::error::{AppError, Result};
use crate::models::Product;
use crate::state::AppState;

/// Product listing, ordered by id.
///
/// GET /api/products
pub async fn index(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    let products = state.stores().products.list().await?;
    Ok(Json(products))
}

/// Product detail.
///
/// GET /api/products/{id}
pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>> {
    let id: ProductId = id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid product id: {id}")))?;

    state
        .stores()
        .products
        .find_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Product {id} not found")))
}
