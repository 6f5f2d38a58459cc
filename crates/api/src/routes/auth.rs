//! Authentication route handlers.
//!
//! Password login against the local user table. The identity lives in the
//! session; see [`crate::middleware::auth`].

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use tower_sessions::Session;

use crate::error::{AppError, Result, clear_sentry_user, set_sentry_user};
use crate::middleware::{clear_current_user, set_current_user};
use crate::models::CurrentUser;
use crate::state::AppState;

/// Login body. `username` is the account email.
///
/// No `Debug`: the password must not reach the logs.
#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "email")]
    pub username: String,
    pub password: String,
}

/// Verify credentials and start a session.
///
/// POST /api/authenticate
#[tracing::instrument(skip(state, session, request))]
pub async fn authenticate(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<LoginRequest>,
) -> Result<Json<CurrentUser>> {
    let user = state
        .auth()
        .login_with_password(&request.username, &request.password)
        .await?;

    let current = CurrentUser {
        id: user.id,
        email: user.email,
    };

    set_current_user(&session, &current).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to store session");
        AppError::Internal("Failed to create session".to_string())
    })?;

    set_sentry_user(&current.id, Some(current.email.as_str()));
    tracing::info!(user_id = %current.id, "User logged in");

    Ok(Json(current))
}

/// End the session.
///
/// POST /api/logout
pub async fn logout(session: Session) -> Result<StatusCode> {
    clear_current_user(&session).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to clear session");
        AppError::Internal("Failed to clear session".to_string())
    })?;

    clear_sentry_user();
    Ok(StatusCode::NO_CONTENT)
}
