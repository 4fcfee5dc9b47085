//! Tier 2：共享存储（远端 KV 的边界），按 TTL 淘汰
//!
//! 边界只有 get / set_with_ttl / delete(pattern)；存储完全不可用时所有操作都退化为未命中。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::cache::CacheError;

/// 共享 KV 存储
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_with_ttl(&self, key: &str, bytes: Vec<u8>, ttl_secs: u64)
        -> Result<(), CacheError>;

    /// pattern 以 `*` 结尾时按前缀删除，否则精确删除；返回删除条数
    async fn delete(&self, pattern: &str) -> Result<usize, CacheError>;

    /// 存储自身做 TTL 淘汰时无需实现
    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }
}

fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

/// 进程内实现（测试与单机部署）；可切换为不可用以模拟存储故障
#[derive(Default)]
pub struct InMemorySharedStore {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
    unavailable: AtomicBool,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(CacheError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(bytes, _)| bytes.clone()))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        bytes: Vec<u8>,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        self.check()?;
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        self.entries
            .write()
            .await
            .insert(key.to_string(), (bytes, expires_at));
        Ok(())
    }

    async fn delete(&self, pattern: &str) -> Result<usize, CacheError> {
        self.check()?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !matches_pattern(k, pattern));
        Ok(before - entries.len())
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.check()?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(before - entries.len())
    }
}

/// 对 SharedStore 的 JSON 编解码封装
#[derive(Clone)]
pub struct SharedTier {
    store: Arc<dyn SharedStore>,
}

impl SharedTier {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.store
            .set_with_ttl(key, bytes, ttl.as_secs().max(1))
            .await
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        self.store.delete(&format!("{}*", prefix)).await
    }

    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        self.store.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = InMemorySharedStore::new();
        store.set_with_ttl("k", b"1".to_vec(), 5).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_pattern() {
        let store = InMemorySharedStore::new();
        store.set_with_ttl("attune:u1:a", vec![1], 60).await.unwrap();
        store.set_with_ttl("attune:u1:b", vec![1], 60).await.unwrap();
        store.set_with_ttl("attune:u2:a", vec![1], 60).await.unwrap();
        assert_eq!(store.delete("attune:u1:*").await.unwrap(), 2);
        assert_eq!(store.delete("attune:u2:a").await.unwrap(), 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = Arc::new(InMemorySharedStore::new());
        store.set_available(false);
        let tier = SharedTier::new(store);
        assert!(matches!(
            tier.set("k", &json!(1), Duration::from_secs(60)).await,
            Err(CacheError::Unavailable(_))
        ));
    }
}
