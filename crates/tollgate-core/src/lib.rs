//! Core domain models and collaborator contracts.
//!
//! Provides the inbound event model, dispatch results, the error taxonomy,
//! observer events, the clock abstraction, and the storage collaborators
//! (`Datastore`, `EventLog`) that the ingestion pipeline is written against.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result, TollgateError};
pub use events::{IngestEvent, IngestObserver, MulticastObserver, NoOpObserver, TracingObserver};
pub use models::{
    DispatchOutcome, DispatchResult, DispatchStatus, EventKey, EventRecord, EventType, IdSource,
    InboundEvent,
};
pub use storage::{
    Datastore, DatastoreEventLog, EventLog, Filter, InsertOutcome, MemoryDatastore, Page,
    PgDatastore,
};
pub use time::{Clock, RealClock, TestClock};
