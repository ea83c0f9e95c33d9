pub mod gate;
pub mod service;

#[cfg(test)]
mod tests;

pub use gate::{FlightGate, GatePermit, GlobalGate, StripedGate};
pub use service::{CacheError, CacheOptions, CacheService, CacheStats};

use async_trait::async_trait;
use redis::Client as RedisClient;
use std::sync::Arc;

/// SharedCache trait 定义慢速共享缓存层的操作
///
/// 值一律为序列化后的字符串，TTL单位为秒。
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    async fn delete(&self, key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// RedisCache 使用Redis实现的共享缓存
pub struct RedisCache {
    client: Arc<RedisClient>,
    namespace: String,
}

impl RedisCache {
    pub fn new(client: Arc<RedisClient>) -> Self {
        Self::with_namespace(client, "verso:")
    }

    /// 多个部署共用同一个Redis时使用不同命名空间
    pub fn with_namespace(client: Arc<RedisClient>, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn from_url(url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self::new(Arc::new(RedisClient::open(url)?)))
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }
}

#[async_trait]
impl SharedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = redis::cmd("GET")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        if let Some(ttl) = ttl {
            redis::cmd("SETEX")
                .arg(self.namespaced(key))
                .arg(ttl.max(1))
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await?;
        } else {
            redis::cmd("SET")
                .arg(self.namespaced(key))
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
