//! A fully wired application over an in-memory datastore.
//!
//! Handlers run inline, so every side effect of a webhook is visible as soon
//! as the response returns.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use secrecy::SecretString;
use serde_json::Value;
use tollgate_api::{create_router, AppState, Sender, SenderRegistry};
use tollgate_core::{
    DatastoreEventLog, EventKey, EventLog, EventRecord, MemoryDatastore, TestClock,
};
use tollgate_ingest::{default_registry, Dispatcher, HandlerRegistry, Ingestor};
use tower::ServiceExt;

use crate::{
    doubles::{RecordingNotifier, RecordingObserver},
    fixtures::{WebhookBuilder, SIGNATURE_HEADER, TEST_SECRET},
};

/// Senders configured by default, both signing with `TEST_SECRET`.
pub const DEFAULT_SENDERS: [&str; 2] = ["atlas", "lexi"];

/// Response captured from the router.
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Parsed JSON body, or `Value::Null` when the body is not JSON.
    pub body: Value,
}

impl TestResponse {
    /// The `error.code` field of an error body.
    pub fn error_code(&self) -> Option<&str> {
        self.body.pointer("/error/code").and_then(Value::as_str)
    }
}

/// Router plus the collaborators behind it.
pub struct TestApp {
    /// Datastore behind the event log and the handlers.
    pub store: MemoryDatastore,
    /// Clock shared by the ingestor and the health checks.
    pub clock: TestClock,
    /// Captures handler notifications.
    pub notifier: Arc<RecordingNotifier>,
    /// Captures ingestion milestones.
    pub observer: Arc<RecordingObserver>,
    /// The ingestor behind the webhook route.
    pub ingestor: Ingestor,
    router: Router,
}

impl TestApp {
    /// Starts a builder.
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    /// App with the product handlers, the default senders, and no admin
    /// token.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Sends `request` through the router.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("in-memory response body is readable");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse { status, headers, body }
    }

    /// Posts `payload` signed with `TEST_SECRET`.
    pub async fn post_webhook(&self, sender: &str, payload: &Value) -> TestResponse {
        self.send(WebhookBuilder::new(sender).json(payload).build()).await
    }

    /// Issues a GET, optionally with a bearer token.
    pub async fn get(&self, path: &str, bearer: Option<&str>) -> TestResponse {
        let mut request = Request::get(path);
        if let Some(token) = bearer {
            request = request.header("authorization", format!("Bearer {token}"));
        }
        self.send(request.body(Body::empty()).expect("GET request parts are valid")).await
    }

    /// The event log the ingestor writes to.
    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        self.ingestor.event_log()
    }

    /// Audit record for `event_id` from `sender`.
    pub async fn record(&self, sender: &str, event_id: &str) -> Option<EventRecord> {
        self.event_log().find(&EventKey::new(sender, event_id)).await.expect("event log readable")
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// Configures a `TestApp`.
#[derive(Default)]
pub struct TestAppBuilder {
    registry: Option<HandlerRegistry>,
    senders: Vec<Sender>,
    admin_token: Option<String>,
    max_body_bytes: Option<usize>,
    handler_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl TestAppBuilder {
    /// Replaces the product handlers.
    #[must_use]
    pub fn handlers(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adds a sender alongside the defaults.
    #[must_use]
    pub fn sender(mut self, sender: Sender) -> Self {
        self.senders.push(sender);
        self
    }

    /// Mounts `GET /events` behind `token`.
    #[must_use]
    pub fn admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// Sets the webhook body limit.
    #[must_use]
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = Some(limit);
        self
    }

    /// Sets the per-handler timeout.
    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Sets the router's request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Wires the app.
    pub fn build(self) -> TestApp {
        let store = MemoryDatastore::new();
        let clock = TestClock::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let observer = Arc::new(RecordingObserver::new());

        let registry = self
            .registry
            .unwrap_or_else(|| default_registry(Arc::new(store.clone()), notifier.clone()));

        let dispatcher = Dispatcher::new(
            Arc::new(DatastoreEventLog::new(Arc::new(store.clone()))),
            observer.clone(),
            Arc::new(clock.clone()),
            self.handler_timeout.unwrap_or(Duration::from_secs(5)),
        );
        let ingestor = Ingestor::new(Arc::new(registry), dispatcher);

        let senders = DEFAULT_SENDERS
            .iter()
            .map(|name| {
                let secret = SecretString::from(TEST_SECRET.to_string());
                Sender::new(*name, SIGNATURE_HEADER, Some(secret))
            })
            .chain(self.senders)
            .fold(SenderRegistry::new(), SenderRegistry::with);

        let mut state = AppState::new(ingestor.clone(), senders, Arc::new(clock.clone()));
        if let Some(token) = self.admin_token {
            state = state.with_admin_token(SecretString::from(token));
        }
        if let Some(limit) = self.max_body_bytes {
            state = state.with_max_body_bytes(limit);
        }

        let request_timeout = self.request_timeout.unwrap_or(Duration::from_secs(30));
        let router = create_router(state, request_timeout);

        TestApp { store, clock, notifier, observer, ingestor, router }
    }
}
