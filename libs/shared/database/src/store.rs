use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("Invalid institution identifier: '{0}'")]
    InvalidTenant(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// A stored JSON document. `version` starts at 1 on creation and is bumped
/// by every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    Updated(Document),
    VersionMismatch { current_version: u64 },
    Missing,
}

/// Persistence contract for a single tenant. Only single-document atomicity
/// is assumed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Create-if-absent. Fails with `AlreadyExists` when the id is taken.
    async fn insert(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError>;

    /// Unconditional upsert.
    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError>;

    /// Single-document compare-and-swap on `version`.
    async fn update_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<CasOutcome, StoreError>;

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// Adds `id` to a named secondary index of `collection`. Indexes are
    /// sets of ids and may hold ids that no longer match; readers filter.
    async fn index_add(&self, collection: &str, index: &str, id: &str) -> Result<(), StoreError>;

    async fn index_remove(&self, collection: &str, index: &str, id: &str) -> Result<(), StoreError>;

    /// Documents whose ids are in the index. Ids without a document are skipped.
    async fn list_indexed(&self, collection: &str, index: &str) -> Result<Vec<Document>, StoreError>;

    /// Atomic increment-with-upsert. The first call for a new counter returns 1.
    async fn increment(&self, counter: &str) -> Result<u64, StoreError>;

    /// Current counter value without incrementing; 0 when absent.
    async fn counter(&self, counter: &str) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub id: String,
    pub version: u64,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<T> {
    Updated(Versioned<T>),
    Conflict { current_version: u64 },
    Missing,
}

/// Typed view over one collection of a tenant store.
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn DocumentStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn get(&self, id: &str) -> Result<Option<Versioned<T>>, StoreError> {
        match self.store.get(self.name, id).await? {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn insert(&self, id: &str, value: &T) -> Result<Versioned<T>, StoreError> {
        let doc = self.store.insert(self.name, id, serde_json::to_value(value)?).await?;
        decode(doc)
    }

    pub async fn put(&self, id: &str, value: &T) -> Result<Versioned<T>, StoreError> {
        let doc = self.store.put(self.name, id, serde_json::to_value(value)?).await?;
        decode(doc)
    }

    pub async fn update_if_version(
        &self,
        id: &str,
        expected_version: u64,
        value: &T,
    ) -> Result<UpdateOutcome<T>, StoreError> {
        let outcome = self
            .store
            .update_if_version(self.name, id, expected_version, serde_json::to_value(value)?)
            .await?;

        Ok(match outcome {
            CasOutcome::Updated(doc) => UpdateOutcome::Updated(decode(doc)?),
            CasOutcome::VersionMismatch { current_version } => UpdateOutcome::Conflict { current_version },
            CasOutcome::Missing => UpdateOutcome::Missing,
        })
    }

    pub async fn list(&self) -> Result<Vec<Versioned<T>>, StoreError> {
        self.store
            .list(self.name)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn index_add(&self, index: &str, id: &str) -> Result<(), StoreError> {
        self.store.index_add(self.name, index, id).await
    }

    pub async fn index_remove(&self, index: &str, id: &str) -> Result<(), StoreError> {
        self.store.index_remove(self.name, index, id).await
    }

    pub async fn list_indexed(&self, index: &str) -> Result<Vec<Versioned<T>>, StoreError> {
        self.store
            .list_indexed(self.name, index)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }
}

fn decode<T: DeserializeOwned>(doc: Document) -> Result<Versioned<T>, StoreError> {
    Ok(Versioned {
        value: serde_json::from_value(doc.body)?,
        id: doc.id,
        version: doc.version,
    })
}
