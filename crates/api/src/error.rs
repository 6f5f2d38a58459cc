//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{AuthError, CheckoutError, OrderError, ReconcileError};

/// Application-level error type for the API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Checkout creation failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Webhook delivery could not be reconciled.
    #[error("Webhook error: {0}")]
    Webhook(#[from] ReconcileError),

    /// Order read or write failed.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::UserAlreadyExists => StatusCode::CONFLICT,
                AuthError::WeakPassword(_) | AuthError::InvalidEmail(_) => StatusCode::BAD_REQUEST,
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Checkout(err) => match err {
                CheckoutError::EmptyCart | CheckoutError::QuantityTooLarge(..) => {
                    StatusCode::BAD_REQUEST
                }
                CheckoutError::Price(..)
                | CheckoutError::Gateway(_)
                | CheckoutError::MissingUrl(_)
                | CheckoutError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Webhook(err) => match err {
                ReconcileError::Webhook(_)
                | ReconcileError::MissingSessionId(_)
                | ReconcileError::SessionNotFound(_) => StatusCode::BAD_REQUEST,
                ReconcileError::Gateway(_) | ReconcileError::Repository(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Order(err) => match err {
                OrderError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                OrderError::Forbidden(_) => StatusCode::FORBIDDEN,
                OrderError::InvalidOrderId(_)
                | OrderError::UnknownUser(_)
                | OrderError::UnknownProduct(_)
                | OrderError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
                OrderError::OrderNotFound(_) => StatusCode::NOT_FOUND,
                OrderError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Body sent to the client. Internal details never leave the process.
    fn client_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials => "Invalid credentials".to_string(),
                AuthError::UserAlreadyExists => {
                    "An account with this email already exists".to_string()
                }
                AuthError::WeakPassword(msg) => msg.clone(),
                AuthError::InvalidEmail(_) => "Invalid email address".to_string(),
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    "Authentication error".to_string()
                }
            },
            // Checkout and webhook failures answer with an empty body.
            Self::Checkout(_) | Self::Webhook(_) => String::new(),
            Self::Order(err) => match err {
                OrderError::Unauthorized(msg) | OrderError::Forbidden(msg) => (*msg).to_string(),
                OrderError::OrderNotFound(_) | OrderError::InvalidOrderId(_) => String::new(),
                OrderError::Repository(_) => "Internal server error".to_string(),
                other => other.to_string(),
            },
            Self::NotFound(msg) | Self::Unauthorized(msg) | Self::BadRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, self.client_message()).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

#[cfg(test)]
mod tests {
    use webshop_core::{OrderId, ProductId};

    use super::*;
    use crate::payments::{PaymentError, WebhookError};

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("product 123".to_string());
        assert_eq!(err.to_string(), "Not found: product 123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_checkout_status_codes() {
        assert_eq!(
            get_status(CheckoutError::EmptyCart.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(CheckoutError::QuantityTooLarge(ProductId::new(1), u32::MAX).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(
                CheckoutError::Gateway(PaymentError::Request("timeout".to_string())).into()
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_webhook_status_codes() {
        assert_eq!(
            get_status(
                ReconcileError::Webhook(WebhookError::InvalidSignature("x".to_string())).into()
            ),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(
                ReconcileError::Webhook(WebhookError::InvalidPayload("x".to_string())).into()
            ),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(ReconcileError::SessionNotFound("cs_1".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(
                ReconcileError::Gateway(PaymentError::Request("timeout".to_string())).into()
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_order_status_codes() {
        assert_eq!(
            get_status(OrderError::Unauthorized("no").into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(OrderError::Forbidden("no").into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(OrderError::InvalidOrderId("abc".to_string()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(OrderError::OrderNotFound(OrderId::new(9)).into()),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_server_errors_hide_details() {
        let err: AppError =
            CheckoutError::Gateway(PaymentError::Request("sk_live leaked".to_string())).into();
        assert_eq!(err.client_message(), "");

        let err = AppError::Internal("stack trace".to_string());
        assert_eq!(err.client_message(), "Internal server error");
    }
}
