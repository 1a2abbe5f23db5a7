//! Signed request builders and payload fixtures.

use axum::{body::Body, http::Request};
use bytes::Bytes;
use serde_json::{json, Value};
use tollgate_api::crypto::{generate_hmac_hex, SIGNATURE_PREFIX};
use uuid::Uuid;

/// Shared secret used by every sender `TestApp` configures.
pub const TEST_SECRET: &str = "whsec_test_secret_0123456789";

/// Header the test senders sign into.
pub const SIGNATURE_HEADER: &str = "elevenlabs-signature";

/// Signs `body` with `secret` in the header format senders use.
pub fn sign(body: &[u8], secret: &str) -> String {
    let digest = generate_hmac_hex(body, secret).expect("HMAC accepts keys of any length");
    format!("{SIGNATURE_PREFIX}{digest}")
}

/// Builder for `POST /webhooks/{sender}` requests.
///
/// Signs the body with `TEST_SECRET` unless told otherwise.
pub struct WebhookBuilder {
    sender: String,
    body: Bytes,
    secret: String,
    signature: Option<String>,
    unsigned: bool,
    headers: Vec<(String, String)>,
}

impl WebhookBuilder {
    /// Starts a request for `sender` with an empty JSON object body.
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: Bytes::from_static(b"{}"),
            secret: TEST_SECRET.to_string(),
            signature: None,
            unsigned: false,
            headers: Vec::new(),
        }
    }

    /// Sets the payload as compact JSON.
    #[must_use]
    pub fn json(mut self, value: &Value) -> Self {
        self.body = Bytes::from(value.to_string());
        self
    }

    /// Sets the body as raw bytes.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Signs with a different secret.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Sends `signature` verbatim instead of computing one.
    #[must_use]
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Omits the signature header.
    #[must_use]
    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The body that will be sent.
    pub fn raw_body(&self) -> &Bytes {
        &self.body
    }

    /// Builds the request.
    pub fn build(self) -> Request<Body> {
        let mut request = Request::post(format!("/webhooks/{}", self.sender))
            .header("content-type", "application/json");

        if !self.unsigned {
            let signature = self.signature.unwrap_or_else(|| sign(&self.body, &self.secret));
            request = request.header(SIGNATURE_HEADER, signature);
        }

        for (name, value) in self.headers {
            request = request.header(name, value);
        }

        request.body(Body::from(self.body)).expect("webhook request parts are valid")
    }
}

/// Random provider-style event id.
pub fn event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

/// Minimal payload carrying only an id and a type.
pub fn event(event_id: &str, event_type: &str) -> Value {
    json!({ "event_id": event_id, "event_type": event_type })
}

/// `conversation_started` for `conversation_id`.
pub fn conversation_started(event_id: &str, conversation_id: &str) -> Value {
    json!({
        "event_id": event_id,
        "event_type": "conversation_started",
        "conversation_id": conversation_id,
        "agent_id": "agent_atlas",
        "metadata": { "caller": "+2348012345678", "channel": "voice" },
    })
}

/// `order_processed` for `order_id`, confirmed to `phone`.
pub fn order_processed(event_id: &str, order_id: &str, phone: &str) -> Value {
    json!({
        "event_id": event_id,
        "event_type": "order_processed",
        "conversation_id": "conv_orders",
        "order_data": {
            "order_id": order_id,
            "customer_phone": phone,
            "items": [{ "sku": "rice-5kg", "quantity": 2 }],
            "total": 18500,
        },
    })
}

/// `trial_started` for a business at `phone`.
pub fn trial_started(event_id: &str, phone: &str, business_name: &str) -> Value {
    json!({
        "event_id": event_id,
        "event_type": "trial_started",
        "conversation_id": "conv_trial",
        "trial_data": {
            "phone_number": phone,
            "business_name": business_name,
            "business_type": "retail",
        },
    })
}
