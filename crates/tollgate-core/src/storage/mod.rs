//! Storage collaborators.
//!
//! `Datastore` is the product's document store: named collections of JSON
//! records keyed by string. `EventLog` is the durable webhook event log built
//! on top of it; its insert is the atomic check-and-insert that makes
//! ingestion idempotent.
//!
//! All writes the ingestion pipeline performs go through these traits, so the
//! PostgreSQL and in-memory backends stay interchangeable.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
    error::Result,
    models::{DispatchOutcome, EventKey, EventRecord},
};

pub mod event_log;
pub mod memory;
pub mod postgres;

pub use event_log::DatastoreEventLog;
pub use memory::MemoryDatastore;
pub use postgres::PgDatastore;

/// Top-level field equality filter for `Datastore::query`.
///
/// An empty filter matches every record in the collection.
pub type Filter = Map<String, Value>;

/// Window over an ordered query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Matching records to skip.
    pub offset: usize,
    /// Maximum records to return.
    pub limit: usize,
}

impl Page {
    /// The first `limit` records.
    pub const fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    /// `limit` records starting after the first `offset`.
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// Result of an atomic insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written.
    Inserted,
    /// A record with the same key already existed and was left untouched.
    AlreadyExists,
}

impl InsertOutcome {
    /// True when this call wrote the record.
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Document store over named collections.
#[async_trait::async_trait]
pub trait Datastore: Send + Sync + std::fmt::Debug {
    /// Writes `record` under `key` unless the key is already taken.
    ///
    /// Check and write happen as one atomic operation; of any number of
    /// concurrent calls for the same key exactly one sees `Inserted`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the backend is unreachable or rejects the write.
    async fn insert_if_absent(
        &self,
        collection: &str,
        key: &str,
        record: Value,
    ) -> Result<InsertOutcome>;

    /// Shallow-merges `patch` into the record under `key`.
    ///
    /// Returns `false` when no such record exists.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if `patch` is not a JSON object, or
    /// another `CoreError` if the backend is unreachable.
    async fn update(&self, collection: &str, key: &str, patch: Value) -> Result<bool>;

    /// Returns the `page` of records whose top-level fields equal every entry
    /// in `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the backend is unreachable.
    async fn query(&self, collection: &str, filter: &Filter, page: Page) -> Result<Vec<Value>>;

    /// Returns the record under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the backend is unreachable.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Verifies the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Unavailable` or `CoreError::Database` when it is not.
    async fn health_check(&self) -> Result<()>;
}

/// Durable webhook event log.
///
/// Serves as both the dedup index and the audit record.
#[async_trait::async_trait]
pub trait EventLog: Send + Sync + std::fmt::Debug {
    /// Records a first delivery. `AlreadyExists` means a duplicate.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the log is unreachable.
    async fn insert_if_absent(&self, record: &EventRecord) -> Result<InsertOutcome>;

    /// Stores the dispatch outcome of a recorded event.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the event was never recorded.
    async fn record_outcome(
        &self,
        key: &EventKey,
        outcome: DispatchOutcome,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Looks up a recorded event.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the log is unreachable or the record is corrupt.
    async fn find(&self, key: &EventKey) -> Result<Option<EventRecord>>;

    /// Lists one `page` of recorded events matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the log is unreachable or a record is corrupt.
    async fn list(&self, filter: &Filter, page: Page) -> Result<Vec<EventRecord>>;

    /// Verifies the log is reachable.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` when it is not.
    async fn health_check(&self) -> Result<()>;
}

/// Returns true when every entry of `filter` equals the record's field.
pub(crate) fn matches_filter(record: &Value, filter: &Filter) -> bool {
    filter.iter().all(|(field, expected)| record.get(field) == Some(expected))
}

/// Applies a shallow merge of `patch` onto `record`.
pub(crate) fn merge_patch(record: &mut Value, patch: Value) {
    if let (Some(target), Value::Object(fields)) = (record.as_object_mut(), patch) {
        for (field, value) in fields {
            target.insert(field, value);
        }
    }
}
