use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 持有期间独占填充权
pub type GatePermit = OwnedMutexGuard<()>;

/// FlightGate trait 缓存填充的互斥闸门
///
/// 等待有上限；超时返回 `None`，由调用方决定退化策略。
#[async_trait]
pub trait FlightGate: Send + Sync {
    async fn acquire(&self, key: &str, wait: Duration) -> Option<GatePermit>;
}

/// 每个缓存服务实例一把锁，所有键共用
///
/// 不同键之间会有少量争用，换来实现简单。
#[derive(Debug, Default)]
pub struct GlobalGate {
    lock: Arc<Mutex<()>>,
}

impl GlobalGate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FlightGate for GlobalGate {
    async fn acquire(&self, _key: &str, wait: Duration) -> Option<GatePermit> {
        tokio::time::timeout(wait, self.lock.clone().lock_owned())
            .await
            .ok()
    }
}

/// 按键哈希分条的锁，相同键总是落在同一把锁上
#[derive(Debug)]
pub struct StripedGate {
    stripes: Vec<Arc<Mutex<()>>>,
}

impl StripedGate {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    fn stripe_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

#[async_trait]
impl FlightGate for StripedGate {
    async fn acquire(&self, key: &str, wait: Duration) -> Option<GatePermit> {
        let lock = self.stripes[self.stripe_for(key)].clone();
        tokio::time::timeout(wait, lock.lock_owned()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_global_gate_serializes_all_keys() {
        let gate = GlobalGate::new();
        let held = gate.acquire("a", Duration::from_millis(50)).await;
        assert!(held.is_some());
        assert!(gate.acquire("b", Duration::from_millis(20)).await.is_none());
        drop(held);
        assert!(gate.acquire("b", Duration::from_millis(20)).await.is_some());
    }

    #[tokio::test]
    async fn test_striped_gate_same_key_contends() {
        let gate = StripedGate::new(16);
        let held = gate.acquire("snapshot", Duration::from_millis(50)).await;
        assert!(held.is_some());
        assert!(gate.acquire("snapshot", Duration::from_millis(20)).await.is_none());
    }

    #[test]
    fn test_striped_gate_is_deterministic() {
        let gate = StripedGate::new(8);
        assert_eq!(gate.stripe_for("query:tags=a"), gate.stripe_for("query:tags=a"));
        assert!(gate.stripe_for("anything") < 8);
        assert_eq!(StripedGate::new(0).stripes.len(), 1);
    }
}
