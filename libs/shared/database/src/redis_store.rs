use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use serde_json::Value;
use tracing::{debug, info};

use crate::store::{CasOutcome, Document, DocumentStore, StoreError};

const INSERT_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('HSET', KEYS[2], ARGV[1], 1)
return 1
"#;

const PUT_SCRIPT: &str = r#"
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return redis.call('HINCRBY', KEYS[2], ARGV[1], 1)
"#;

// Returns {status, version}: 1 = updated, 0 = version mismatch, -1 = missing.
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[2], ARGV[1])
if not current then
    return {-1, 0}
end
if current ~= ARGV[2] then
    return {0, tonumber(current)}
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return {1, redis.call('HINCRBY', KEYS[2], ARGV[1], 1)}
"#;

/// Creates a Redis pool and verifies it with a PING.
pub async fn connect_pool(redis_url: &str) -> Result<Pool, StoreError> {
    let cfg = Config::from_url(redis_url);
    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::Pool(format!("Pool creation error: {}", e)))?;

    let mut conn = pool
        .get()
        .await
        .map_err(|e| StoreError::Pool(format!("Connection error: {}", e)))?;

    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    info!("Redis store initialized successfully");

    Ok(pool)
}

/// Tenant store over Redis. Each collection lives in two hashes: the JSON
/// bodies and their versions. Counters are plain string keys so `INCR`
/// gives create-if-absent semantics.
pub struct RedisStore {
    pool: Pool,
    namespace: String,
}

impl RedisStore {
    pub fn new(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    fn doc_key(&self, collection: &str) -> String {
        format!("{}:doc:{}", self.namespace, collection)
    }

    fn version_key(&self, collection: &str) -> String {
        format!("{}:ver:{}", self.namespace, collection)
    }

    fn index_key(&self, collection: &str, index: &str) -> String {
        format!("{}:idx:{}:{}", self.namespace, collection, index)
    }

    fn counter_key(&self, counter: &str) -> String {
        format!("{}:counter:{}", self.namespace, counter)
    }

    async fn get_connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to get Redis connection: {}", e)))
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let mut conn = self.get_connection().await?;

        let (body, version): (Option<String>, Option<u64>) = redis::pipe()
            .atomic()
            .hget(self.doc_key(collection), id)
            .hget(self.version_key(collection), id)
            .query_async(&mut conn)
            .await?;

        match (body, version) {
            (Some(body), Some(version)) => Ok(Some(Document {
                id: id.to_string(),
                version,
                body: serde_json::from_str(&body)?,
            })),
            (None, _) => Ok(None),
            (Some(_), None) => Err(StoreError::Corrupt(format!(
                "{}/{} has no version entry",
                collection, id
            ))),
        }
    }

    async fn insert(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError> {
        let mut conn = self.get_connection().await?;
        let encoded = serde_json::to_string(&body)?;

        let created: i64 = Script::new(INSERT_SCRIPT)
            .key(self.doc_key(collection))
            .key(self.version_key(collection))
            .arg(id)
            .arg(&encoded)
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        debug!("Inserted {}/{}", collection, id);
        Ok(Document {
            id: id.to_string(),
            version: 1,
            body,
        })
    }

    async fn put(&self, collection: &str, id: &str, body: Value) -> Result<Document, StoreError> {
        let mut conn = self.get_connection().await?;
        let encoded = serde_json::to_string(&body)?;

        let version: u64 = Script::new(PUT_SCRIPT)
            .key(self.doc_key(collection))
            .key(self.version_key(collection))
            .arg(id)
            .arg(&encoded)
            .invoke_async(&mut conn)
            .await?;

        Ok(Document {
            id: id.to_string(),
            version,
            body,
        })
    }

    async fn update_if_version(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        body: Value,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.get_connection().await?;
        let encoded = serde_json::to_string(&body)?;

        let (status, version): (i64, u64) = Script::new(CAS_SCRIPT)
            .key(self.doc_key(collection))
            .key(self.version_key(collection))
            .arg(id)
            .arg(expected_version.to_string())
            .arg(&encoded)
            .invoke_async(&mut conn)
            .await?;

        Ok(match status {
            1 => CasOutcome::Updated(Document {
                id: id.to_string(),
                version,
                body,
            }),
            0 => CasOutcome::VersionMismatch {
                current_version: version,
            },
            _ => CasOutcome::Missing,
        })
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let mut conn = self.get_connection().await?;

        let (bodies, versions): (HashMap<String, String>, HashMap<String, u64>) = redis::pipe()
            .atomic()
            .hgetall(self.doc_key(collection))
            .hgetall(self.version_key(collection))
            .query_async(&mut conn)
            .await?;

        bodies
            .into_iter()
            .map(|(id, body)| {
                let version = versions.get(&id).copied().ok_or_else(|| {
                    StoreError::Corrupt(format!("{}/{} has no version entry", collection, id))
                })?;
                Ok(Document {
                    body: serde_json::from_str(&body)?,
                    id,
                    version,
                })
            })
            .collect()
    }

    async fn index_add(&self, collection: &str, index: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.sadd(self.index_key(collection, index), id).await?;
        Ok(())
    }

    async fn index_remove(&self, collection: &str, index: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.srem(self.index_key(collection, index), id).await?;
        Ok(())
    }

    async fn list_indexed(&self, collection: &str, index: &str) -> Result<Vec<Document>, StoreError> {
        let mut conn = self.get_connection().await?;

        let ids: Vec<String> = conn.smembers(self.index_key(collection, index)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (bodies, versions): (Vec<Option<String>>, Vec<Option<u64>>) = redis::pipe()
            .atomic()
            .cmd("HMGET")
            .arg(self.doc_key(collection))
            .arg(&ids)
            .cmd("HMGET")
            .arg(self.version_key(collection))
            .arg(&ids)
            .query_async(&mut conn)
            .await?;

        ids.into_iter()
            .zip(bodies.into_iter().zip(versions))
            .filter_map(|(id, entry)| match entry {
                (Some(body), Some(version)) => Some(
                    serde_json::from_str(&body)
                        .map(|body| Document { id, version, body })
                        .map_err(StoreError::from),
                ),
                (None, _) => None,
                (Some(_), None) => Some(Err(StoreError::Corrupt(format!(
                    "{}/{} has no version entry",
                    collection, id
                )))),
            })
            .collect()
    }

    async fn increment(&self, counter: &str) -> Result<u64, StoreError> {
        let mut conn = self.get_connection().await?;
        let value: u64 = conn.incr(self.counter_key(counter), 1u64).await?;
        Ok(value)
    }

    async fn counter(&self, counter: &str) -> Result<u64, StoreError> {
        let mut conn = self.get_connection().await?;
        let value: Option<u64> = conn.get(self.counter_key(counter)).await?;
        Ok(value.unwrap_or(0))
    }
}
