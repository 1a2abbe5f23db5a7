//! Tollgate HTTP API.
//!
//! Each trusted sender posts signed events to `POST /webhooks/{sender}`.
//! The signature is checked over the raw body before the payload is parsed,
//! then the event is handed to the ingestor. Operational endpoints report
//! event log health and, behind an admin token, list recorded events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod senders;
pub mod server;

pub use config::{Config, SenderConfig};
pub use error::ApiError;
pub use senders::{Sender, SenderRegistry};
pub use server::{create_router, shutdown_signal, start_server, AppState};

/// Default webhook body limit: 1 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
