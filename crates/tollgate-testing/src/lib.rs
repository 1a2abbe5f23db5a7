//! Test infrastructure shared by the Tollgate crates.
//!
//! Provides signed request builders, payload fixtures, recording test
//! doubles for handlers, notifiers and observers, and `TestApp`, a fully
//! wired router over an in-memory datastore.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
pub mod doubles;
pub mod fixtures;

pub use app::{TestApp, TestAppBuilder, TestResponse};
pub use doubles::{CountingHandler, FailingHandler, RecordingNotifier, RecordingObserver};
pub use fixtures::{sign, WebhookBuilder, SIGNATURE_HEADER, TEST_SECRET};
pub use tollgate_core::{Clock, TestClock};
