//! Webhook event envelope.

use serde::Deserialize;

/// Event type emitted when a hosted checkout has been paid.
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// A provider webhook event.
///
/// Only the envelope is typed; `data.object` stays raw JSON because its shape
/// depends on the event type.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

/// Payload carried by an event.
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Whether this event reports a completed checkout.
    #[must_use]
    pub fn is_checkout_completed(&self) -> bool {
        self.event_type == CHECKOUT_SESSION_COMPLETED
    }

    /// Id of the object the event is about (the session id for checkout events).
    #[must_use]
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_checkout_completed() {
        let json = r#"{
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_test_1", "object": "checkout.session"}}
        }"#;
        let event: WebhookEvent = serde_json::from_str(json).unwrap();

        assert!(event.is_checkout_completed());
        assert_eq!(event.object_id(), Some("cs_test_1"));
    }

    #[test]
    fn test_other_event_type() {
        let json = r#"{"id": "evt_2", "type": "charge.refunded", "data": {"object": {}}}"#;
        let event: WebhookEvent = serde_json::from_str(json).unwrap();

        assert!(!event.is_checkout_completed());
        assert_eq!(event.object_id(), None);
    }
}
