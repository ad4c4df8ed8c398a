use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::debug;

use crate::memory::InMemoryStore;
use crate::redis_store::RedisStore;
use crate::store::{DocumentStore, StoreError};

/// Maps an institution identifier to its isolated store.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, institution_id: &str) -> Result<Arc<dyn DocumentStore>, StoreError>;

    /// Every institution that has been resolved at least once.
    async fn known_tenants(&self) -> Result<Vec<String>, StoreError>;
}

pub fn validate_institution_id(institution_id: &str) -> Result<(), StoreError> {
    let valid = !institution_id.trim().is_empty()
        && institution_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTenant(institution_id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryTenantResolver {
    tenants: RwLock<HashMap<String, Arc<InMemoryStore>>>,
}

impl InMemoryTenantResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantResolver for InMemoryTenantResolver {
    async fn resolve(&self, institution_id: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        validate_institution_id(institution_id)?;

        if let Some(store) = self.tenants.read().await.get(institution_id) {
            return Ok(store.clone());
        }

        let mut tenants = self.tenants.write().await;
        let store = tenants
            .entry(institution_id.to_string())
            .or_insert_with(|| {
                debug!("Provisioning in-memory store for institution {}", institution_id);
                Arc::new(InMemoryStore::new())
            })
            .clone();
        Ok(store)
    }

    async fn known_tenants(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.tenants.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// All tenants share one pool; isolation comes from the key namespace.
/// Resolved tenants are recorded in a registry set shared by every process.
pub struct RedisTenantResolver {
    pool: Pool,
    key_prefix: String,
    registered: RwLock<HashSet<String>>,
}

impl RedisTenantResolver {
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
            registered: RwLock::new(HashSet::new()),
        }
    }

    fn registry_key(&self) -> String {
        format!("{}:tenants", self.key_prefix)
    }

    async fn register(&self, institution_id: &str) -> Result<(), StoreError> {
        if self.registered.read().await.contains(institution_id) {
            return Ok(());
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to get Redis connection: {}", e)))?;
        let _: i64 = conn.sadd(self.registry_key(), institution_id).await?;

        self.registered.write().await.insert(institution_id.to_string());
        debug!("Registered institution {}", institution_id);
        Ok(())
    }
}

#[async_trait]
impl TenantResolver for RedisTenantResolver {
    async fn resolve(&self, institution_id: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
        validate_institution_id(institution_id)?;
        self.register(institution_id).await?;
        let namespace = format!("{}:{}", self.key_prefix, institution_id);
        Ok(Arc::new(RedisStore::new(self.pool.clone(), namespace)))
    }

    async fn known_tenants(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to get Redis connection: {}", e)))?;
        let mut ids: Vec<String> = conn.smembers(self.registry_key()).await?;
        ids.sort();
        Ok(ids)
    }
}
