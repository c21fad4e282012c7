//! Redis layer for callmeter
//!
//! Redis is never the source of truth for money. It carries two concerns:
//!
//! - A cache-aside copy of tenant billing profiles ([`CachedTenantConfig`])
//! - Fire-and-forget kill signals published per organization
//!   ([`RedisKillSignalPublisher`])
//!
//! # Example
//!
//! ```no_run
//! use callmeter_cache::RedisCache;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RedisCache::new("redis://127.0.0.1:6379").await?;
//!
//!     cache.set_json("my_key", &"my_value", 60).await?;
//!     let value: Option<String> = cache.get_json("my_key").await?;
//!     assert_eq!(value, Some("my_value".to_string()));
//!
//!     Ok(())
//! }
//! ```

pub mod keys;
pub mod publisher;
pub mod tenant;

pub use publisher::RedisKillSignalPublisher;
pub use tenant::CachedTenantConfig;

use callmeter_core::error::AppError;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};

/// Redis client with connection pooling
///
/// Wraps a Redis ConnectionManager to provide multiplexed access. Cloning is
/// cheap and shares the underlying connection.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Create a new Redis cache instance
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheConnection` if the connection fails
    pub async fn new(url: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::CacheConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::CacheConnection(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self { manager })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis ping failed: {}", e);
                AppError::Cache(format!("Ping failed: {}", e))
            })?;
        Ok(())
    }

    /// Get a JSON value and deserialize it
    ///
    /// Returns `Ok(None)` when the key does not exist.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        debug!("GET {}", key);
        let mut conn = self.manager.clone();

        let result: Option<String> = conn.get(key).await.map_err(Self::map_redis_error)?;

        match result {
            Some(json) => {
                let value = serde_json::from_str::<T>(&json).map_err(|e| {
                    error!("Failed to deserialize value for key {}: {}", key, e);
                    AppError::Serialization(format!("Deserialization failed: {}", e))
                })?;
                debug!("Cache HIT: {}", key);
                Ok(Some(value))
            }
            None => {
                debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }

    /// Store a value as JSON with a TTL
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> Result<(), AppError> {
        debug!("SET {} (TTL: {}s)", key, ttl_secs);
        let mut conn = self.manager.clone();

        let json = serde_json::to_string(value)?;
        let _: () = conn
            .set_ex(key, json, ttl_secs)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(())
    }

    /// Delete a key; `Ok(true)` if it existed
    pub async fn delete(&self, key: &str) -> Result<bool, AppError> {
        debug!("DEL {}", key);
        let mut conn = self.manager.clone();

        let deleted: i32 = conn.del(key).await.map_err(Self::map_redis_error)?;
        Ok(deleted > 0)
    }

    /// Publish a JSON payload; returns the number of subscribers reached
    pub async fn publish_json<T: Serialize + Sync>(
        &self,
        channel: &str,
        payload: &T,
    ) -> Result<i64, AppError> {
        debug!("PUBLISH {}", channel);
        let mut conn = self.manager.clone();

        let json = serde_json::to_string(payload)?;
        let receivers: i64 = conn
            .publish(channel, json)
            .await
            .map_err(Self::map_redis_error)?;

        Ok(receivers)
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::CacheConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Cache(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: i32,
        name: String,
    }

    async fn setup_cache() -> RedisCache {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        RedisCache::new(&url)
            .await
            .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ping() {
        let cache = setup_cache().await;
        assert!(cache.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_set_get_delete() {
        let cache = setup_cache().await;
        let sample = Sample {
            id: 1,
            name: "sample".to_string(),
        };

        cache.set_json("callmeter_test:sample", &sample, 60).await.unwrap();
        let back: Option<Sample> = cache.get_json("callmeter_test:sample").await.unwrap();
        assert_eq!(back, Some(sample));

        assert!(cache.delete("callmeter_test:sample").await.unwrap());
        let gone: Option<Sample> = cache.get_json("callmeter_test:sample").await.unwrap();
        assert_eq!(gone, None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_publish_without_subscribers() {
        let cache = setup_cache().await;
        let reached = cache
            .publish_json("callmeter_test:channel", &"hello")
            .await
            .unwrap();
        assert_eq!(reached, 0);
    }
}
