//! Health check handlers for service monitoring.
//!
//! Provides liveness, readiness, and health endpoints. Health and readiness
//! report event log connectivity, since no webhook can be accepted without it.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tollgate_core::{Clock, EventLog};
use tracing::{debug, error, instrument};

use crate::server::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Configured sender names
    pub senders: Vec<String>,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Critical systems failing
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Event log connectivity
    pub event_log: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Health service that encapsulates the clock for testable health checks.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Checks the event log and assembles the report.
    pub async fn health_check(
        &self,
        event_log: &dyn EventLog,
        senders: Vec<String>,
    ) -> HealthResponse {
        debug!("Performing health check");

        let timestamp = self.clock.now_utc();
        let started = self.clock.now();

        let (status, message) = match event_log.health_check().await {
            Ok(()) => (ComponentStatus::Up, None),
            Err(e) => {
                error!(error = %e, "event log health check failed");
                (ComponentStatus::Down, Some(format!("event log unavailable: {e}")))
            },
        };
        let elapsed = self.clock.now().saturating_duration_since(started);

        HealthResponse {
            status: match status {
                ComponentStatus::Up => HealthStatus::Healthy,
                ComponentStatus::Down => HealthStatus::Unhealthy,
            },
            timestamp,
            checks: HealthChecks {
                event_log: ComponentHealth {
                    status,
                    message,
                    response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                },
            },
            senders,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `GET /health`.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let senders = state.senders.names().into_iter().map(str::to_string).collect();
    let response = HealthService::new(state.clock.clone())
        .health_check(state.ingestor.event_log().as_ref(), senders)
        .await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, "Health check completed");

    (status_code, Json(response)).into_response()
}

/// `GET /ready`: the health check, used as a readiness probe.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    health_check(State(state)).await
}

/// `GET /live`: answers while the process can serve HTTP.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "tollgate",
    });

    (StatusCode::OK, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use tollgate_core::{DatastoreEventLog, MemoryDatastore, TestClock};

    use super::*;

    #[tokio::test]
    async fn unavailable_event_log_is_unhealthy() {
        let store = MemoryDatastore::new();
        let log = DatastoreEventLog::new(Arc::new(store.clone()));
        let service = HealthService::new(Arc::new(TestClock::new()));

        let healthy = service.health_check(&log, vec!["atlas".into()]).await;
        assert_eq!(healthy.status, HealthStatus::Healthy);
        assert!(healthy.checks.event_log.message.is_none());

        store.set_unavailable(true);
        let unhealthy = service.health_check(&log, Vec::new()).await;
        assert_eq!(unhealthy.status, HealthStatus::Unhealthy);
        assert_eq!(unhealthy.checks.event_log.status, ComponentStatus::Down);
    }
}
