//! HTTP request handlers for the Tollgate API.
//!
//! - `webhook` - signed webhook receiver, one route per trusted sender
//! - `health` - health, readiness, and liveness probes
//! - `events` - audit listing of recorded events, behind the admin token
//!
//! Failures are returned as `ApiError`, which renders the taxonomy code and
//! message with the matching HTTP status.

pub mod events;
pub mod health;
pub mod webhook;

pub use events::list_events;
pub use health::{health_check, liveness_check, readiness_check};
pub use webhook::receive_webhook;
