//! In-memory document store.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use lorebook::KnowledgeEntry;

use super::KnowledgeStore;
use crate::errors::StoreError;

/// Documents kept in per-collection vectors, in insertion order.
///
/// Reads and writes can be made to fail, to exercise degrade paths.
#[derive(Debug, Default)]
pub struct InMemoryKnowledgeStore {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a knowledge entry in `collection`.
    pub fn insert_entry(&self, collection: &str, entry: &KnowledgeEntry) -> Result<(), StoreError> {
        let document = serde_json::to_value(entry)?;
        self.insert_raw(collection, document);
        Ok(())
    }

    /// Store a document as-is.
    pub fn insert_raw(&self, collection: &str, document: Value) {
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    /// All documents of a collection.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections.lock().get(collection).map_or(0, Vec::len)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("reads from '{collection}' disabled")));
        }
        let Some(expected) = filter.as_object() else {
            return Err(StoreError::Query {
                collection: collection.to_string(),
                message: "filter must be an object".to_string(),
            });
        };

        let collections = self.collections.lock();
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(documents
            .iter()
            .filter(|doc| matches_filter(doc, expected))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                collection: collection.to_string(),
                message: "writes disabled".to_string(),
            });
        }

        let Value::Object(mut fields) = data else {
            return Err(StoreError::Write {
                collection: collection.to_string(),
                message: "document must be an object".to_string(),
            });
        };

        let id = Uuid::new_v4().to_string();
        fields.insert("_id".to_string(), Value::String(id.clone()));
        self.insert_raw(collection, Value::Object(fields));
        Ok(id)
    }
}

/// Top-level equality match.
fn matches_filter(document: &Value, expected: &Map<String, Value>) -> bool {
    let empty = Map::new();
    let fields = document.as_object().unwrap_or(&empty);
    expected
        .iter()
        .all(|(key, value)| fields.get(key) == Some(value))
}
