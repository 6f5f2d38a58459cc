//! Integration tests for the webshop backend.
//!
//! # Running Tests
//!
//! ```bash
//! # Router-level tests (no database, no network)
//! cargo test -p webshop-integration-tests
//!
//! # Smoke tests against a running server
//! WEBSHOP_TEST_URL=http://localhost:8080 cargo test -p webshop-integration-tests -- --ignored
//! ```
//!
//! [`TestApp`] drives the real router through `tower::ServiceExt::oneshot`
//! with an in-memory store and a fake payment gateway behind it.

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use secrecy::SecretString;
use serde_json::{Value, json};
use tower::ServiceExt;
use tower_sessions::SessionManagerLayer;

use webshop_api::config::{CheckoutConfig, StripeConfig};
use webshop_api::db::{MemoryStore, Stores};
use webshop_api::models::CurrentUser;
use webshop_api::payments::{FakeGateway, sign_payload};
use webshop_api::state::AppState;
use webshop_core::{Email, UserId};

/// Webhook signing secret shared by the app under test and [`sign`].
pub const WEBHOOK_SECRET: &str = "whsec_integration_3f9c1a7e5b2d";

/// The application under test plus handles on its backing doubles.
pub struct TestApp {
    pub store: MemoryStore,
    pub gateway: FakeGateway,
    router: Router,
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl TestApp {
    /// Build an app over empty stores.
    #[must_use]
    pub fn new() -> Self {
        let store = MemoryStore::new();
        let gateway = FakeGateway::new();

        let stripe = StripeConfig {
            secret_key: SecretString::from("sk_test_integration"),
            webhook_secret: SecretString::from(WEBHOOK_SECRET),
            api_base: "http://127.0.0.1:9".to_string(),
            webhook_tolerance_secs: 300,
            timeout_secs: 1,
        };

        let state = AppState::new(
            Stores::memory(&store),
            Arc::new(gateway.clone()),
            &stripe,
            CheckoutConfig::default(),
        );

        let router = webshop_api::app(state, false).layer(SessionManagerLayer::new(
            tower_sessions::MemoryStore::default(),
        ));

        Self {
            store,
            gateway,
            router,
        }
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// `GET path`, optionally as `caller`.
    pub async fn get(&self, path: &str, caller: Option<&CurrentUser>) -> TestResponse {
        let mut request = Request::get(path)
            .body(Body::empty())
            .expect("Failed to build request");
        if let Some(caller) = caller {
            request.extensions_mut().insert(caller.clone());
        }
        self.send(request).await
    }

    /// `POST path` with a JSON body, optionally as `caller`.
    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        caller: Option<&CurrentUser>,
    ) -> TestResponse {
        let mut request = Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("Failed to build request");
        if let Some(caller) = caller {
            request.extensions_mut().insert(caller.clone());
        }
        self.send(request).await
    }

    /// Deliver a webhook payload with an optional `Stripe-Signature` header.
    pub async fn post_webhook(&self, payload: &[u8], signature: Option<&str>) -> TestResponse {
        let mut builder = Request::post("/api/webhook");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Open a checkout for `user_ref` and return the created session id.
    pub async fn checkout(&self, user_ref: &str, cart: &[(i32, u32)]) -> String {
        let cart: Vec<Value> = cart
            .iter()
            .map(|(product_id, quantity)| json!({"productId": product_id, "quantity": quantity}))
            .collect();

        let response = self
            .post_json(
                "/api/create-checkout-session",
                &json!({"cart": cart, "userId": user_ref}),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "checkout failed");

        let url = response.json()["url"]
            .as_str()
            .expect("checkout response has a url")
            .to_string();
        url.rsplit('/')
            .next()
            .expect("url ends in a session id")
            .to_string()
    }
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    /// Body parsed as JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("Response body is not JSON")
    }

    /// Body as UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A `checkout.session.completed` event for `session_id`.
#[must_use]
pub fn completed_event(session_id: &str) -> Vec<u8> {
    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": {"object": {"id": session_id, "object": "checkout.session"}}
    })
    .to_string()
    .into_bytes()
}

/// Sign `payload` with [`WEBHOOK_SECRET`] at the current time.
#[must_use]
pub fn sign(payload: &[u8]) -> String {
    sign_payload(WEBHOOK_SECRET, payload, chrono::Utc::now().timestamp())
        .expect("Failed to sign payload")
}

/// A session identity for `email`.
#[must_use]
pub fn caller(id: i32, email: &str) -> CurrentUser {
    CurrentUser {
        id: UserId::new(id),
        email: Email::parse(email).expect("valid test email"),
    }
}
