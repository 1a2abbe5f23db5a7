//! Idempotent event ingestion and handler dispatch.
//!
//! An [`Ingestor`] records each verified webhook event exactly once in the
//! event log and routes first deliveries to the [`EventHandler`] registered
//! for the event type. Redeliveries are answered as duplicates without
//! touching a handler.
//!
//! # Architecture
//!
//! 1. **Validate** - blank `event_id` or `event_type` is rejected unwritten
//! 2. **Record** - atomic `insert_if_absent` is both dedup check and audit
//! 3. **Dispatch** - handler runs inline or on the [`DispatchPool`], bounded
//!    by a timeout, and its outcome is written back to the record
//!
//! Handlers reach the outside world only through the `Datastore` and
//! [`Notifier`] collaborators, so tests swap in memory and recording fakes.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use tollgate_core::{DatastoreEventLog, MemoryDatastore, RealClock, TracingObserver};
//! use tollgate_ingest::{default_registry, Dispatcher, Ingestor, LogNotifier};
//!
//! # async fn example(body: bytes::Bytes) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryDatastore::new());
//! let dispatcher = Dispatcher::new(
//!     Arc::new(DatastoreEventLog::new(store.clone())),
//!     Arc::new(TracingObserver),
//!     Arc::new(RealClock::new()),
//!     Duration::from_secs(10),
//! );
//! let registry = Arc::new(default_registry(store, Arc::new(LogNotifier)));
//! let ingestor = Ingestor::new(registry, dispatcher);
//!
//! let event = ingestor.parse_event("atlas", body)?;
//! let result = ingestor.ingest(event).await?;
//! println!("{}", result.status);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod ingestor;
pub mod notifier;
pub mod registry;
pub mod worker_pool;

pub use dispatcher::{DispatchJob, Dispatcher};
pub use error::{HandlerError, IngestError, NotifyError, Result};
pub use handlers::default_registry;
pub use ingestor::Ingestor;
pub use notifier::{GatewayConfig, GatewayNotifier, LogNotifier, Notifier};
pub use registry::{DispatchContext, EventHandler, HandlerRegistry};
pub use worker_pool::{DispatchPool, DispatchQueue, PoolConfig};

/// Default number of dispatch workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default dispatch queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Default handler timeout in seconds.
pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 10;
