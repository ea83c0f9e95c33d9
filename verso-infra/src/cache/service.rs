use moka::future::Cache as MokaCache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use super::gate::{FlightGate, GlobalGate, StripedGate};
use super::SharedCache;

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub enabled: bool,

    /// 默认过期时间（分钟）
    pub default_duration_minutes: u64,

    /// 慢速层单个值序列化后的最大字节数，超出则只进快速层
    pub max_slow_tier_item_bytes: usize,

    pub fast_tier_capacity: u64,

    /// 等待填充闸门的上限（秒）
    pub gate_timeout_secs: u64,

    /// 大于1时使用按键分条的闸门
    pub lock_stripes: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            default_duration_minutes: 60,
            max_slow_tier_item_bytes: 1024 * 1024,
            fast_tier_capacity: 10_000,
            gate_timeout_secs: 30,
            lock_stripes: 1,
        }
    }
}

impl CacheOptions {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_duration_minutes.max(1) * 60)
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.gate_timeout_secs)
    }
}

/// 缓存错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Timed out after {waited:?} waiting to populate cache key {key}")]
    GateTimeout { key: String, waited: Duration },
}

/// 缓存统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub fast_hits: u64,
    pub slow_hits: u64,
    pub misses: u64,
    pub factory_calls: u64,
    pub entries: u64,
    pub tracked_keys: usize,
}

/// 快速层条目，值以类型擦除的方式保存，各自携带TTL
#[derive(Clone)]
struct FastEntry {
    value: Arc<dyn Any + Send + Sync>,
    ttl: Duration,
}

struct EntryExpiry;

impl Expiry<String, FastEntry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, value: &FastEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &FastEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// 统一缓存键：去除首尾空白并转小写
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

/// CacheService 两级缓存
///
/// 快速层为进程内moka缓存，慢速层为可选的共享缓存（如Redis）。
/// `get_or_create` 对同一个键保证同一时刻最多一次工厂调用。
pub struct CacheService {
    options: CacheOptions,
    fast: MokaCache<String, FastEntry>,
    slow: Option<Arc<dyn SharedCache>>,
    gate: Arc<dyn FlightGate>,
    /// 已写入过的全部键，慢速层不支持前缀扫描
    keys: RwLock<BTreeSet<String>>,
    fast_hits: AtomicU64,
    slow_hits: AtomicU64,
    misses: AtomicU64,
    factory_calls: AtomicU64,
}

impl CacheService {
    pub fn new(options: CacheOptions, slow: Option<Arc<dyn SharedCache>>) -> Self {
        let gate: Arc<dyn FlightGate> = if options.lock_stripes > 1 {
            Arc::new(StripedGate::new(options.lock_stripes))
        } else {
            Arc::new(GlobalGate::new())
        };
        Self::with_gate(options, slow, gate)
    }

    pub fn with_gate(
        options: CacheOptions,
        slow: Option<Arc<dyn SharedCache>>,
        gate: Arc<dyn FlightGate>,
    ) -> Self {
        let fast = MokaCache::builder()
            .max_capacity(options.fast_tier_capacity)
            .expire_after(EntryExpiry)
            .name("verso_fast_tier")
            .build();

        Self {
            options,
            fast,
            slow,
            gate,
            keys: RwLock::new(BTreeSet::new()),
            fast_hits: AtomicU64::new(0),
            slow_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            factory_calls: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// 读取或创建
    ///
    /// 顺序：快速层 → 慢速层（命中后回填快速层）→ 闸门 → 再查快速层 → 工厂。
    /// 闸门等待超时后再查一次快速层，仍未命中则返回 [`CacheError::GateTimeout`]。
    pub async fn get_or_create<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        factory: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        if !self.options.enabled {
            self.factory_calls.fetch_add(1, Ordering::Relaxed);
            return factory().await;
        }

        let key = normalize_key(key);
        let ttl = ttl.unwrap_or_else(|| self.options.default_ttl());

        if let Some(value) = self.fast_get::<T>(&key).await {
            self.fast_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache fast-tier hit for key: {}", key);
            return Ok(value);
        }

        if let Some(value) = self.slow_get::<T>(&key).await {
            self.slow_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache slow-tier hit for key: {}, promoting", key);
            self.fast_insert(&key, value.clone(), ttl).await;
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        let waited = self.options.gate_timeout();
        let Some(permit) = self.gate.acquire(&key, waited).await else {
            warn!("Timed out waiting {:?} for cache gate on key: {}", waited, key);
            if let Some(value) = self.fast_get::<T>(&key).await {
                return Ok(value);
            }
            return Err(CacheError::GateTimeout { key, waited }.into());
        };

        // 等待期间其他调用方可能已经填充
        if let Some(value) = self.fast_get::<T>(&key).await {
            self.fast_hits.fetch_add(1, Ordering::Relaxed);
            drop(permit);
            return Ok(value);
        }

        self.factory_calls.fetch_add(1, Ordering::Relaxed);
        let value = factory().await?;
        self.store(&key, &value, ttl).await;
        drop(permit);

        Ok(value)
    }

    /// 在闸门内强制重建
    ///
    /// 旧值在新值写入前一直可读；工厂失败时旧值保持不变。
    pub async fn refresh<T, F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        factory: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        if !self.options.enabled {
            self.factory_calls.fetch_add(1, Ordering::Relaxed);
            return factory().await;
        }

        let key = normalize_key(key);
        let ttl = ttl.unwrap_or_else(|| self.options.default_ttl());
        let waited = self.options.gate_timeout();
        let Some(permit) = self.gate.acquire(&key, waited).await else {
            warn!("Timed out waiting {:?} for cache gate to refresh key: {}", waited, key);
            return Err(CacheError::GateTimeout { key, waited }.into());
        };

        self.factory_calls.fetch_add(1, Ordering::Relaxed);
        let value = factory().await?;
        self.store(&key, &value, ttl).await;
        drop(permit);

        Ok(value)
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        if !self.options.enabled {
            return None;
        }
        let key = normalize_key(key);
        if let Some(value) = self.fast_get::<T>(&key).await {
            self.fast_hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }
        let value = self.slow_get::<T>(&key).await?;
        self.slow_hits.fetch_add(1, Ordering::Relaxed);
        self.fast_insert(&key, value.clone(), self.options.default_ttl()).await;
        Some(value)
    }

    pub async fn set<T>(&self, key: &str, value: T, ttl: Option<Duration>)
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        if !self.options.enabled {
            return;
        }
        let key = normalize_key(key);
        let ttl = ttl.unwrap_or_else(|| self.options.default_ttl());
        self.store(&key, &value, ttl).await;
    }

    pub async fn remove(&self, key: &str) {
        let key = normalize_key(key);
        self.evict(&key).await;
        self.untrack(&key);
    }

    /// 按前缀删除，返回删除的键数量
    pub async fn remove_by_prefix(&self, prefix: &str) -> usize {
        let prefix = normalize_key(prefix);
        let matched: Vec<String> = match self.keys.read() {
            Ok(keys) => keys
                .range(prefix.clone()..)
                .take_while(|k| k.starts_with(&prefix))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        };

        for key in &matched {
            self.evict(key).await;
            self.untrack(key);
        }
        debug!("Removed {} cache entries with prefix: {}", matched.len(), prefix);
        matched.len()
    }

    pub async fn clear(&self) {
        let all: Vec<String> = match self.keys.write() {
            Ok(mut keys) => std::mem::take(&mut *keys).into_iter().collect(),
            Err(_) => Vec::new(),
        };
        self.fast.invalidate_all();
        if let Some(slow) = &self.slow {
            for key in &all {
                if let Err(e) = slow.delete(key).await {
                    warn!("Failed to delete slow-tier cache key {}: {}", key, e);
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fast_hits: self.fast_hits.load(Ordering::Relaxed),
            slow_hits: self.slow_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            factory_calls: self.factory_calls.load(Ordering::Relaxed),
            entries: self.fast.entry_count(),
            tracked_keys: self.keys.read().map(|k| k.len()).unwrap_or(0),
        }
    }

    async fn fast_get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        let entry = self.fast.get(key).await?;
        match entry.value.downcast_ref::<T>() {
            Some(value) => Some(value.clone()),
            None => {
                debug!("Cache entry {} holds a different type, treating as miss", key);
                None
            }
        }
    }

    async fn slow_get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let slow = self.slow.as_ref()?;
        match slow.get(key).await {
            Ok(Some(json)) => match serde_json::from_str::<T>(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Failed to deserialize slow-tier value for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Slow-tier cache get error for {}: {}", key, e);
                None
            }
        }
    }

    async fn fast_insert<T>(&self, key: &str, value: T, ttl: Duration)
    where
        T: Send + Sync + 'static,
    {
        let entry = FastEntry {
            value: Arc::new(value),
            ttl,
        };
        self.fast.insert(key.to_string(), entry).await;
        self.track(key);
    }

    async fn store<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize + Clone + Send + Sync + 'static,
    {
        self.fast_insert(key, value.clone(), ttl).await;

        let Some(slow) = &self.slow else {
            return;
        };
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize cache value for {}: {}", key, e);
                return;
            }
        };
        if json.len() > self.options.max_slow_tier_item_bytes {
            warn!(
                "Cache value for {} is {} bytes, over the slow-tier limit of {}; skipping slow tier",
                key,
                json.len(),
                self.options.max_slow_tier_item_bytes
            );
            return;
        }
        if let Err(e) = slow.set(key, &json, Some(ttl.as_secs())).await {
            warn!("Failed to write slow-tier cache for {}: {}", key, e);
        }
    }

    async fn evict(&self, key: &str) {
        self.fast.invalidate(key).await;
        if let Some(slow) = &self.slow {
            if let Err(e) = slow.delete(key).await {
                warn!("Failed to delete slow-tier cache key {}: {}", key, e);
            }
        }
    }

    fn track(&self, key: &str) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key.to_string());
        }
    }

    fn untrack(&self, key: &str) {
        if let Ok(mut keys) = self.keys.write() {
            keys.remove(key);
        }
    }
}
