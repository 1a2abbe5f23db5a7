//! In-memory datastore.
//!
//! Used by tests and by local runs without a database. Check-and-insert holds
//! the write lock for the whole operation, which gives the same single-winner
//! guarantee as the PostgreSQL unique key.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde_json::Value;
use tokio::sync::RwLock;

use super::{matches_filter, merge_patch, Datastore, Filter, InsertOutcome, Page};
use crate::error::{CoreError, Result};

#[derive(Debug, Default)]
struct State {
    next_seq: u64,
    collections: HashMap<String, HashMap<String, (u64, Value)>>,
}

/// Datastore held in process memory.
///
/// Clones share the same records. `set_unavailable` makes every operation
/// fail with `CoreError::Unavailable`, for exercising outage paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatastore {
    state: Arc<RwLock<State>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryDatastore {
    /// Creates an empty datastore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of records in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.state.read().await.collections.get(collection).map_or(0, HashMap::len)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Unavailable("memory datastore marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Datastore for MemoryDatastore {
    async fn insert_if_absent(
        &self,
        collection: &str,
        key: &str,
        record: Value,
    ) -> Result<InsertOutcome> {
        self.ensure_available()?;

        let mut state = self.state.write().await;
        let seq = state.next_seq;
        let records = state.collections.entry(collection.to_string()).or_default();
        if records.contains_key(key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        records.insert(key.to_string(), (seq, record));
        state.next_seq += 1;

        Ok(InsertOutcome::Inserted)
    }

    async fn update(&self, collection: &str, key: &str, patch: Value) -> Result<bool> {
        self.ensure_available()?;
        if !patch.is_object() {
            return Err(CoreError::InvalidInput("update patch must be a JSON object".to_string()));
        }

        let mut state = self.state.write().await;
        let Some((_, record)) =
            state.collections.get_mut(collection).and_then(|records| records.get_mut(key))
        else {
            return Ok(false);
        };
        merge_patch(record, patch);

        Ok(true)
    }

    async fn query(&self, collection: &str, filter: &Filter, page: Page) -> Result<Vec<Value>> {
        self.ensure_available()?;

        let state = self.state.read().await;
        let Some(records) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&(u64, Value)> =
            records.values().filter(|(_, record)| matches_filter(record, filter)).collect();
        matched.sort_by_key(|(seq, _)| *seq);

        Ok(matched
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.ensure_available()?;

        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .and_then(|records| records.get(key))
            .map(|(_, record)| record.clone()))
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn second_insert_reports_existing_and_keeps_first() {
        let store = MemoryDatastore::new();

        let first = store.insert_if_absent("orders", "ord_1", json!({"total": 10})).await.unwrap();
        let second = store.insert_if_absent("orders", "ord_1", json!({"total": 99})).await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::AlreadyExists);
        assert_eq!(store.get("orders", "ord_1").await.unwrap(), Some(json!({"total": 10})));
    }

    #[tokio::test]
    async fn keys_are_scoped_per_collection() {
        let store = MemoryDatastore::new();

        store.insert_if_absent("orders", "k", json!({})).await.unwrap();
        let other = store.insert_if_absent("complaints", "k", json!({})).await.unwrap();

        assert!(other.is_inserted());
    }

    #[tokio::test]
    async fn update_merges_and_reports_missing() {
        let store = MemoryDatastore::new();
        store
            .insert_if_absent("conversations", "c1", json!({"status": "active", "platform": "web"}))
            .await
            .unwrap();

        assert!(store.update("conversations", "c1", json!({"status": "completed"})).await.unwrap());
        assert!(!store.update("conversations", "missing", json!({"status": "x"})).await.unwrap());

        let record = store.get("conversations", "c1").await.unwrap().unwrap();
        assert_eq!(record, json!({"status": "completed", "platform": "web"}));
    }

    #[tokio::test]
    async fn query_filters_in_insertion_order() {
        let store = MemoryDatastore::new();
        for (key, status) in [("b", "open"), ("a", "closed"), ("c", "open")] {
            let record = json!({"id": key, "status": status});
            store.insert_if_absent("complaints", key, record).await.unwrap();
        }

        let mut filter = Filter::new();
        filter.insert("status".into(), json!("open"));
        let open = store.query("complaints", &filter, Page::first(10)).await.unwrap();

        let ids: Vec<_> = open.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["b", "c"]);
        assert!(store.query("unknown", &Filter::new(), Page::first(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_pages_through_matches() {
        let store = MemoryDatastore::new();
        for i in 0..5 {
            store.insert_if_absent("orders", &format!("ord_{i}"), json!({"n": i})).await.unwrap();
        }

        let page = store.query("orders", &Filter::new(), Page::new(1, 2)).await.unwrap();
        assert_eq!(page, vec![json!({"n": 1}), json!({"n": 2})]);

        let tail = store.query("orders", &Filter::new(), Page::new(4, 10)).await.unwrap();
        assert_eq!(tail, vec![json!({"n": 4})]);
        assert!(store.query("orders", &Filter::new(), Page::new(5, 10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let store = MemoryDatastore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.insert_if_absent("orders", "k", json!({})).await,
            Err(CoreError::Unavailable(_))
        ));
        assert!(store.health_check().await.is_err());

        store.set_unavailable(false);
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_have_one_winner() {
        let store = MemoryDatastore::new();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.insert_if_absent("webhook_events", "atlas:evt_2", json!({"n": i})).await
                })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_inserted() {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(store.count("webhook_events").await, 1);
    }
}
