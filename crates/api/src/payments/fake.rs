//! In-memory payment gateway for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CheckoutSession, CheckoutSessionRequest, PaymentError, PaymentGateway};

#[derive(Default)]
struct FakeState {
    requests: Vec<CheckoutSessionRequest>,
    sessions: BTreeMap<String, CheckoutSession>,
    fail_create: bool,
    fail_retrieve: bool,
    retrievals: usize,
}

/// Gateway double that records every request and serves sessions from memory.
///
/// Created sessions get ids `cs_test_1`, `cs_test_2`, … and keep the request
/// metadata, the same way the provider echoes it back.
#[derive(Clone, Default)]
pub struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGateway {
    /// Create a gateway that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make session creation fail with a provider error.
    pub async fn fail_create(&self, fail: bool) {
        self.state.lock().await.fail_create = fail;
    }

    /// Make session retrieval fail with a request error.
    pub async fn fail_retrieve(&self, fail: bool) {
        self.state.lock().await.fail_retrieve = fail;
    }

    /// Register a session as if it had been created out of band.
    pub async fn put_session(&self, session: CheckoutSession) {
        self.state
            .lock()
            .await
            .sessions
            .insert(session.id.clone(), session);
    }

    /// Requests received by `create_checkout_session`, oldest first.
    pub async fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Number of `retrieve_checkout_session` calls.
    pub async fn retrievals(&self) -> usize {
        self.state.lock().await.retrievals
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let mut state = self.state.lock().await;
        state.requests.push(request.clone());

        if state.fail_create {
            return Err(PaymentError::Api {
                status: 500,
                message: "simulated outage".to_string(),
            });
        }

        let id = format!("cs_test_{}", state.requests.len());
        let session = CheckoutSession {
            url: Some(format!("https://checkout.stripe.test/c/pay/{id}")),
            id: id.clone(),
            metadata: request.metadata.clone(),
        };
        state.sessions.insert(id, session.clone());

        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Option<CheckoutSession>, PaymentError> {
        let mut state = self.state.lock().await;
        state.retrievals += 1;

        if state.fail_retrieve {
            return Err(PaymentError::Request("simulated timeout".to_string()));
        }

        Ok(state.sessions.get(session_id).cloned())
    }
}
