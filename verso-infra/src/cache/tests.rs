//! 缓存服务测试
//!
//! 覆盖单次填充、慢速层回填、慢速层故障退化、闸门超时与前缀删除。

use super::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, PartialEq)]
enum TestError {
    Cache(CacheError),
    Factory,
}

impl From<CacheError> for TestError {
    fn from(err: CacheError) -> Self {
        TestError::Cache(err)
    }
}

/// 基于HashMap的共享缓存
#[derive(Default)]
struct MapSharedCache {
    data: Mutex<HashMap<String, String>>,
    gets: AtomicUsize,
}

#[async_trait]
impl SharedCache for MapSharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Option<u64>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.data.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }
}

/// 所有操作都失败的共享缓存
struct FailingSharedCache;

#[async_trait]
impl SharedCache for FailingSharedCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
        Err("connection refused".into())
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<u64>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("connection refused".into())
    }

    async fn delete(&self, _key: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("connection refused".into())
    }
}

fn options() -> CacheOptions {
    CacheOptions {
        gate_timeout_secs: 5,
        ..CacheOptions::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_or_create_calls_factory_once() {
    let cache = Arc::new(CacheService::new(options(), None));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_create("snapshot:content", None, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, TestError>(vec![1u32, 2, 3])
                })
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), vec![1, 2, 3]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().factory_calls, 1);
}

#[tokio::test]
async fn test_keys_are_case_normalized() {
    let cache = CacheService::new(options(), None);
    cache.set("  Query:Tags=Rust ", "cached".to_string(), None).await;

    let value: Option<String> = cache.get("query:tags=rust").await;
    assert_eq!(value.as_deref(), Some("cached"));

    let created: Result<String, TestError> = cache
        .get_or_create("QUERY:TAGS=RUST", None, || async { Err(TestError::Factory) })
        .await;
    assert_eq!(created.unwrap(), "cached");
}

#[tokio::test]
async fn test_slow_tier_hit_promotes_to_fast_tier() {
    let slow = Arc::new(MapSharedCache::default());
    slow.data
        .lock()
        .unwrap()
        .insert("greeting".to_string(), "\"hello\"".to_string());
    let cache = CacheService::new(options(), Some(slow.clone()));

    let value: Result<String, TestError> = cache
        .get_or_create("greeting", None, || async { Err(TestError::Factory) })
        .await;
    assert_eq!(value.unwrap(), "hello");
    assert_eq!(slow.gets.load(Ordering::SeqCst), 1);

    // 第二次直接命中快速层，不再访问慢速层
    let again: Option<String> = cache.get("greeting").await;
    assert_eq!(again.as_deref(), Some("hello"));
    assert_eq!(slow.gets.load(Ordering::SeqCst), 1);

    let stats = cache.stats();
    assert_eq!(stats.slow_hits, 1);
    assert_eq!(stats.fast_hits, 1);
    assert_eq!(stats.factory_calls, 0);
}

#[tokio::test]
async fn test_slow_tier_failure_degrades_to_factory() {
    let cache = CacheService::new(options(), Some(Arc::new(FailingSharedCache)));

    let value: Result<u64, TestError> = cache.get_or_create("answer", None, || async { Ok(42) }).await;
    assert_eq!(value.unwrap(), 42);

    let fast: Option<u64> = cache.get("answer").await;
    assert_eq!(fast, Some(42));
    assert_eq!(cache.stats().factory_calls, 1);

    // 删除同样不会因慢速层故障而失败
    cache.remove("answer").await;
    let removed: Option<u64> = cache.get("answer").await;
    assert_eq!(removed, None);
}

#[tokio::test]
async fn test_oversized_values_skip_slow_tier() {
    let slow = Arc::new(MapSharedCache::default());
    let cache = CacheService::new(
        CacheOptions {
            max_slow_tier_item_bytes: 16,
            ..options()
        },
        Some(slow.clone()),
    );

    cache.set("small", "ok".to_string(), None).await;
    cache.set("big", "x".repeat(64), None).await;

    let data = slow.data.lock().unwrap();
    assert!(data.contains_key("small"));
    assert!(!data.contains_key("big"));
    drop(data);

    let big: Option<String> = cache.get("big").await;
    assert_eq!(big.map(|s| s.len()), Some(64));
}

#[tokio::test]
async fn test_disabled_cache_always_calls_factory() {
    let cache = CacheService::new(
        CacheOptions {
            enabled: false,
            ..options()
        },
        None,
    );
    let calls = AtomicUsize::new(0);
    let counter = &calls;

    for _ in 0..3 {
        let value: Result<u8, TestError> = cache
            .get_or_create("k", None, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;
        assert_eq!(value.unwrap(), 7);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    cache.set("k", 1u8, None).await;
    assert_eq!(cache.get::<u8>("k").await, None);
}

#[tokio::test]
async fn test_remove_by_prefix_prunes_index() {
    let slow = Arc::new(MapSharedCache::default());
    let cache = CacheService::new(options(), Some(slow.clone()));

    cache.set("query:a", 1u32, None).await;
    cache.set("query:b", 2u32, None).await;
    cache.set("snapshot:content", 3u32, None).await;
    assert_eq!(cache.stats().tracked_keys, 3);

    assert_eq!(cache.remove_by_prefix("QUERY:").await, 2);
    assert_eq!(cache.get::<u32>("query:a").await, None);
    assert_eq!(cache.get::<u32>("query:b").await, None);
    assert_eq!(cache.get::<u32>("snapshot:content").await, Some(3));
    assert_eq!(cache.stats().tracked_keys, 1);
    assert_eq!(slow.data.lock().unwrap().len(), 1);

    cache.clear().await;
    assert_eq!(cache.get::<u32>("snapshot:content").await, None);
    assert_eq!(cache.stats().tracked_keys, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gate_timeout_returns_error_without_value() {
    let cache = Arc::new(CacheService::new(
        CacheOptions {
            gate_timeout_secs: 0,
            ..CacheOptions::default()
        },
        None,
    ));

    // 占住全局闸门
    let slow_cache = cache.clone();
    let holder = tokio::spawn(async move {
        slow_cache
            .get_or_create("a", None, || async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, TestError>(1u32)
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let blocked: Result<u32, TestError> = cache.get_or_create("b", None, || async { Ok(2) }).await;
    assert!(matches!(
        blocked,
        Err(TestError::Cache(CacheError::GateTimeout { ref key, .. })) if key == "b"
    ));

    assert_eq!(holder.await.unwrap().unwrap(), 1);
}

#[tokio::test]
async fn test_refresh_keeps_old_value_when_factory_fails() {
    let cache = CacheService::new(options(), None);
    cache.set("snapshot", 1u32, None).await;

    let failed: Result<u32, TestError> = cache.refresh("snapshot", None, || async { Err(TestError::Factory) }).await;
    assert_eq!(failed, Err(TestError::Factory));
    assert_eq!(cache.get::<u32>("snapshot").await, Some(1));

    let refreshed: Result<u32, TestError> = cache.refresh("snapshot", None, || async { Ok(2) }).await;
    assert_eq!(refreshed, Ok(2));
    assert_eq!(cache.get::<u32>("snapshot").await, Some(2));
}

#[tokio::test]
async fn test_type_mismatch_is_a_miss() {
    let cache = CacheService::new(options(), None);
    cache.set("k", 5u32, None).await;
    assert_eq!(cache.get::<String>("k").await, None);
}
