use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use shared_database::{
    validate_institution_id, CasOutcome, Document, DocumentStore, InMemoryStore, StoreError,
    TenantResolver,
};
use shared_utils::test_utils::TEST_INSTITUTION;

/// In-memory store whose `nth` conditional write to one collection fails
/// with a pool error. Every other call goes through.
pub struct FailingStore {
    inner: InMemoryStore,
    collection: &'static str,
    nth: usize,
    writes: AtomicUsize,
}

impl FailingStore {
    pub fn new(collection: &'static str, nth: usize) -> Self {
        Self {
            inner: InMemoryStore::new(),
            collection,
            nth,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn insert(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError> {
        self.inner.insert(collection, id, body).await
    }

    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError> {
        self.inner.put(collection, id, body).await
    }

    async fn update_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<CasOutcome, StoreError> {
        if collection == self.collection && self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            return Err(StoreError::Pool("connection reset by peer".to_string()));
        }
        self.inner.update_if_version(collection, id, expected_version, body).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.list(collection).await
    }

    async fn index_add(&self, collection: &str, index: &str, id: &str) -> Result<(), StoreError> {
        self.inner.index_add(collection, index, id).await
    }

    async fn index_remove(&self, collection: &str, index: &str, id: &str) -> Result<(), StoreError> {
        self.inner.index_remove(collection, index, id).await
    }

    async fn list_indexed(&self, collection: &str, index: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.list_indexed(collection, index).await
    }

    async fn increment(&self, counter: &str) -> Result<u64, StoreError> {
        self.inner.increment(counter).await
    }

    async fn counter(&self, counter: &str) -> Result<u64, StoreError> {
        self.inner.counter(counter).await
    }
}

/// Serves one `FailingStore` as the test institution.
pub struct FailingTenants {
    store: Arc<FailingStore>,
}

impl FailingTenants {
    pub fn new(store: FailingStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

#[async_trait]
impl TenantResolver for FailingTenants {
    async fn resolve(&self, institution_id: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        validate_institution_id(institution_id)?;
        if institution_id != TEST_INSTITUTION {
            return Err(StoreError::InvalidTenant(institution_id.to_string()));
        }
        Ok(self.store.clone())
    }

    async fn known_tenants(&self) -> Result<Vec<String>, StoreError> {
        Ok(vec![TEST_INSTITUTION.to_string()])
    }
}
