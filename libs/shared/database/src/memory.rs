use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::store::{CasOutcome, Document, DocumentStore, StoreError};

/// Process-local store with the same atomicity guarantees as the Redis
/// store: every operation holds the collection lock for its whole
/// read-modify-write.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Document>>>,
    counters: Mutex<HashMap<String, u64>>,
    indexes: RwLock<HashMap<(String, String), BTreeSet<String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn insert(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        let doc = Document {
            id: id.to_string(),
            version: 1,
            body,
        };
        docs.insert(id.to_string(), doc.clone());
        debug!("Inserted {}/{}", collection, id);
        Ok(doc)
    }

    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        let version = docs.get(id).map(|doc| doc.version + 1).unwrap_or(1);
        let doc = Document {
            id: id.to_string(),
            version,
            body,
        };
        docs.insert(id.to_string(), doc.clone());
        Ok(doc)
    }

    async fn update_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<CasOutcome, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(existing) = collections.get_mut(collection).and_then(|docs| docs.get_mut(id)) else {
            return Ok(CasOutcome::Missing);
        };

        if existing.version != expected_version {
            return Ok(CasOutcome::VersionMismatch {
                current_version: existing.version,
            });
        }

        existing.version += 1;
        existing.body = body;
        Ok(CasOutcome::Updated(existing.clone()))
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn index_add(&self, collection: &str, index: &str, id: &str) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().await;
        indexes
            .entry((collection.to_string(), index.to_string()))
            .or_default()
            .insert(id.to_string());
        Ok(())
    }

    async fn index_remove(&self, collection: &str, index: &str, id: &str) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().await;
        if let Some(ids) = indexes.get_mut(&(collection.to_string(), index.to_string())) {
            ids.remove(id);
        }
        Ok(())
    }

    async fn list_indexed(&self, collection: &str, index: &str) -> Result<Vec<Document>, StoreError> {
        let ids: Vec<String> = self
            .indexes
            .read()
            .await
            .get(&(collection.to_string(), index.to_string()))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| docs.get(id).cloned()).collect())
    }

    async fn increment(&self, counter: &str) -> Result<u64, StoreError> {
        let mut counters = self.counters.lock().await;
        let value = counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn counter(&self, counter: &str) -> Result<u64, StoreError> {
        let counters = self.counters.lock().await;
        Ok(counters.get(counter).copied().unwrap_or(0))
    }
}
