//! Caller identity extractors and session helpers.
//!
//! The session layer stores a [`CurrentUser`] under
//! [`session_keys::CURRENT_USER`]. [`current_user_middleware`] lifts it into the
//! request extensions, where [`OptionalAuth`] picks it up. Handlers never talk
//! to the session store directly.

use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;
use tracing::Span;

use crate::models::{CurrentUser, session_keys};

/// Extractor that optionally gets the current user.
///
/// Never rejects; order handlers decide between 401 and 403 themselves.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(OptionalAuth(user): OptionalAuth) -> impl IntoResponse {
///     match user {
///         Some(u) => format!("Hello, {}!", u.email),
///         None => "Hello, guest!".to_string(),
///     }
/// }
/// ```
pub struct OptionalAuth(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for OptionalAuth
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<CurrentUser>().cloned()))
    }
}

/// Middleware that resolves the session identity once per request.
///
/// An identity already present in the extensions wins, so an upstream layer
/// can authenticate the request by other means.
pub async fn current_user_middleware(mut request: Request, next: Next) -> Response {
    if request.extensions().get::<CurrentUser>().is_none()
        && let Some(session) = request.extensions().get::<Session>().cloned()
    {
        match session.get::<CurrentUser>(session_keys::CURRENT_USER).await {
            Ok(Some(user)) => {
                request.extensions_mut().insert(user);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read session identity"),
        }
    }

    if let Some(user) = request.extensions().get::<CurrentUser>() {
        Span::current().record("user_id", tracing::field::display(user.id));
    }

    next.run(request).await
}

/// Helper to set the current user in the session.
///
/// The session id is cycled first so a pre-login id cannot be reused.
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn set_current_user(
    session: &Session,
    user: &CurrentUser,
) -> Result<(), tower_sessions::session::Error> {
    session.cycle_id().await?;
    session.insert(session_keys::CURRENT_USER, user).await
}

/// Helper to clear the current user from the session (logout).
///
/// # Errors
///
/// Returns an error if the session cannot be modified.
pub async fn clear_current_user(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.flush().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{Request, header},
        middleware::from_fn,
        routing::{get, post},
    };
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore, SessionManagerLayer};
    use webshop_core::{Email, UserId};

    use super::*;

    fn alice() -> CurrentUser {
        CurrentUser {
            id: UserId::new(1),
            email: Email::parse("a@x.com").unwrap(),
        }
    }

    async fn whoami(OptionalAuth(user): OptionalAuth) -> String {
        user.map_or_else(|| "guest".to_string(), |u| u.email.to_string())
    }

    async fn login(session: Session) {
        set_current_user(&session, &alice()).await.unwrap();
    }

    async fn logout(session: Session) {
        clear_current_user(&session).await.unwrap();
    }

    fn router() -> Router {
        Router::new()
            .route("/", get(whoami))
            .route("/login", post(login))
            .route("/logout", post(logout))
            .layer(from_fn(current_user_middleware))
            .layer(SessionManagerLayer::new(MemoryStore::default()))
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn with_cookie(method: &str, uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_session_identity_is_guest() {
        let response = router()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body(response).await, "guest");
    }

    #[tokio::test]
    async fn test_extension_identity_is_kept() {
        let mut request = Request::get("/").body(Body::empty()).unwrap();
        request.extensions_mut().insert(alice());

        let response = router().oneshot(request).await.unwrap();
        assert_eq!(body(response).await, "a@x.com");
    }

    #[tokio::test]
    async fn test_session_login_and_logout() {
        let app = router();

        let response = app
            .clone()
            .oneshot(Request::post("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();

        let response = app.clone().oneshot(with_cookie("GET", "/", &cookie)).await.unwrap();
        assert_eq!(body(response).await, "a@x.com");

        app.clone()
            .oneshot(with_cookie("POST", "/logout", &cookie))
            .await
            .unwrap();

        let response = app.oneshot(with_cookie("GET", "/", &cookie)).await.unwrap();
        assert_eq!(body(response).await, "guest");
    }
}
