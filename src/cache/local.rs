//! Tier 1：进程内缓存，严格容量 + LRU 淘汰
//!
//! entries 与 recency 在同一把锁下更新，并发访问不会出现丢失更新或读到一半的条目。

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache::{CacheEntry, CacheTier};

struct Slot {
    entry: CacheEntry,
    stamp: u64,
}

#[derive(Default)]
struct LocalState {
    entries: HashMap<String, Slot>,
    /// 访问戳 -> 键；最小的戳即最久未使用
    recency: BTreeMap<u64, String>,
    clock: u64,
}

impl LocalState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.stamp);
        Some(slot)
    }
}

pub struct LocalTier {
    capacity: usize,
    state: Mutex<LocalState>,
}

impl LocalTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LocalState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 命中时刷新 LRU 位置；过期条目就地删除
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let expired = state.entries.get(key)?.entry.expires_at <= now;
        if expired {
            state.remove(key);
            return None;
        }

        let stamp = state.tick();
        let slot = state.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut slot.stamp, stamp);
        let entry = slot.entry.clone();
        state.recency.remove(&previous);
        state.recency.insert(stamp, key.to_string());
        Some(entry)
    }

    pub async fn insert(&self, key: &str, value: Value, ttl: Duration, origin: CacheTier) {
        let mut state = self.state.lock().await;
        state.remove(key);

        while state.entries.len() >= self.capacity {
            let Some((_, oldest)) = state.recency.pop_first() else {
                break;
            };
            state.entries.remove(&oldest);
            tracing::debug!(key = %oldest, "tier1 evicted");
        }

        let now = Instant::now();
        let stamp = state.tick();
        state.entries.insert(
            key.to_string(),
            Slot {
                entry: CacheEntry {
                    key: key.to_string(),
                    value,
                    created_at: now,
                    expires_at: now + ttl,
                    origin,
                },
                stamp,
            },
        );
        state.recency.insert(stamp, key.to_string());
    }

    pub async fn remove_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state.lock().await;
        let keys: Vec<String> = state
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
