//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Body size limit (webhook routes)
//! 5. Admin authentication (audit routes)
//! 6. Handler execution

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use secrecy::SecretString;
use tollgate_core::Clock;
use tollgate_ingest::Ingestor;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{handlers, middleware::auth::require_admin, senders::SenderRegistry};

/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Records and dispatches events.
    pub ingestor: Ingestor,
    /// Trusted senders.
    pub senders: Arc<SenderRegistry>,
    /// Time source for health reports.
    pub clock: Arc<dyn Clock>,
    /// Bearer token guarding `GET /events`.
    pub admin_token: Option<Arc<SecretString>>,
    /// Webhook body limit, echoed in 413 responses.
    pub max_body_bytes: usize,
}

impl AppState {
    /// Creates state with the default body limit and no admin token.
    pub fn new(ingestor: Ingestor, senders: SenderRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            ingestor,
            senders: Arc::new(senders),
            clock,
            admin_token: None,
            max_body_bytes: crate::DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Enables `GET /events` behind `token`.
    #[must_use]
    pub fn with_admin_token(mut self, token: SecretString) -> Self {
        self.admin_token = Some(Arc::new(token));
        self
    }

    /// Sets the webhook body limit.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// Creates the Axum router with all routes and middleware.
///
/// The audit route is only mounted when an admin token is configured.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use tollgate_api::{create_router, AppState, SenderRegistry};
/// use tollgate_core::{DatastoreEventLog, MemoryDatastore, NoOpObserver, RealClock};
/// use tollgate_ingest::{Dispatcher, HandlerRegistry, Ingestor};
///
/// let store = Arc::new(MemoryDatastore::new());
/// let dispatcher = Dispatcher::new(
///     Arc::new(DatastoreEventLog::new(store)),
///     Arc::new(NoOpObserver),
///     Arc::new(RealClock::new()),
///     Duration::from_secs(10),
/// );
/// let ingestor = Ingestor::new(Arc::new(HandlerRegistry::new()), dispatcher);
/// let state = AppState::new(ingestor, SenderRegistry::new(), Arc::new(RealClock::new()));
///
/// let app = create_router(state, Duration::from_secs(30));
/// ```
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let webhook_routes = Router::new()
        .route("/webhooks/{sender}", post(handlers::receive_webhook))
        .layer(DefaultBodyLimit::max(state.max_body_bytes));

    let mut router = Router::new().merge(health_routes).merge(webhook_routes);

    if state.admin_token.is_some() {
        let admin_routes = Router::new()
            .route("/events", get(handlers::list_events))
            .layer(middleware::from_fn_with_state(state.clone(), require_admin));
        router = router.merge(admin_routes);
    }

    router
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Adds an `X-Request-Id` header, reusing the caller's when present.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Serves `app` on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(
    app: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Finishing in-flight requests before stopping");
}
