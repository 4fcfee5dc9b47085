//! 缓存层级编排
//!
//! get：Tier 1 -> Tier 2 -> Tier 3，较慢层的命中复制到 Tier 1。
//! set：总是写 Tier 1；durable 时写 Tier 2；Tier 3 只由预热任务写入。
//! 共享存储的任何故障都记 warn 日志并按未命中处理。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::cache::key::scoped_user_id;
use crate::cache::{
    CacheContext, CacheError, CacheHit, CacheKey, CachePolicy, CacheStrategy, CacheTier,
    LocalTier, PredictiveTier, SharedStore, SharedTier,
};
use crate::config::CacheSection;
use crate::risk::RiskLevel;

#[derive(Debug, Default)]
struct Counters {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    predictive_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    rejected_writes: AtomicU64,
    store_faults: AtomicU64,
    invalidations: AtomicU64,
}

/// 缓存统计快照
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub local_hits: u64,
    pub shared_hits: u64,
    pub predictive_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub rejected_writes: u64,
    pub store_faults: u64,
    pub invalidations: u64,
    pub local_entries: usize,
    pub predictive_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.shared_hits + self.predictive_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub struct CacheHierarchy {
    policy: CachePolicy,
    local: LocalTier,
    shared: Option<SharedTier>,
    predictive: PredictiveTier,
    counters: Counters,
}

impl CacheHierarchy {
    /// store 为 None 或配置关闭共享层时只使用 Tier 1 / Tier 3
    pub fn new(cfg: CacheSection, store: Option<Arc<dyn SharedStore>>) -> Self {
        let shared = store
            .filter(|_| cfg.shared_enabled)
            .map(SharedTier::new);
        let predictive_max_age = Duration::from_secs(cfg.max_ttl_secs.max(cfg.min_ttl_secs));
        Self {
            local: LocalTier::new(cfg.local_capacity),
            policy: CachePolicy::new(cfg),
            shared,
            predictive: PredictiveTier::new(predictive_max_age),
            counters: Counters::default(),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn min_ttl(&self) -> Duration {
        Duration::from_secs(self.policy.config().min_ttl_secs)
    }

    fn fault(&self, op: &str, key: &str, err: &CacheError) {
        self.counters.store_faults.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(op, key, error = %err, "shared cache fault, treating as miss");
    }

    pub async fn get(&self, key: &CacheKey, ctx: &CacheContext) -> Option<CacheHit> {
        if !self.policy.is_cacheable(ctx) {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let key_str = key.to_string();

        if let Some(entry) = self.local.get(&key_str).await {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(CacheHit {
                value: entry.value,
                tier: CacheTier::Local,
                origin: entry.origin,
                authoritative: entry.origin != CacheTier::Predictive,
            });
        }

        if let Some(shared) = &self.shared {
            match shared.get(&key_str).await {
                Ok(Some(value)) => {
                    self.counters.shared_hits.fetch_add(1, Ordering::Relaxed);
                    // 共享条目的剩余 TTL 未知：提升到 Tier 1 时只保留最短 TTL
                    self.local
                        .insert(&key_str, value.clone(), self.min_ttl(), CacheTier::Shared)
                        .await;
                    return Some(CacheHit {
                        value,
                        tier: CacheTier::Shared,
                        origin: CacheTier::Shared,
                        authoritative: true,
                    });
                }
                Ok(None) => {}
                Err(e) => self.fault("get", &key_str, &e),
            }
        }

        if let Some(entry) = self.predictive.get(key.user_id(), key.segment()).await {
            self.counters.predictive_hits.fetch_add(1, Ordering::Relaxed);
            // 推测条目只保留最短 TTL
            self.local
                .insert(&key_str, entry.value.clone(), self.min_ttl(), CacheTier::Predictive)
                .await;
            return Some(CacheHit {
                value: entry.value,
                tier: CacheTier::Predictive,
                origin: CacheTier::Predictive,
                authoritative: false,
            });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 写入；不可缓存时返回 false
    pub async fn set(
        &self,
        key: &CacheKey,
        value: Value,
        ctx: &CacheContext,
        strategy: CacheStrategy,
    ) -> bool {
        if !self.policy.is_cacheable(ctx) {
            self.counters.rejected_writes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, sensitive = ctx.sensitive, confidence = ctx.confidence, "cache write rejected");
            return false;
        }

        let key_str = key.to_string();
        let ttl = self.policy.ttl(ctx);
        self.local
            .insert(&key_str, value.clone(), ttl, CacheTier::Local)
            .await;

        if self.policy.is_durable(ctx, strategy) {
            if let Some(shared) = &self.shared {
                if let Err(e) = shared.set(&key_str, &value, ttl).await {
                    self.fault("set", &key_str, &e);
                }
            }
        }

        if ctx.task.is_some() {
            self.predictive
                .observe(key.user_id(), key.segment(), &value)
                .await;
        }

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// 清除某个用户在所有层中的条目
    pub async fn invalidate_user(&self, user_id: &str) -> usize {
        let prefix = CacheKey::user_prefix(user_id);
        let mut removed = self.local.remove_prefix(&prefix).await;
        if let Some(shared) = &self.shared {
            match shared.delete_prefix(&prefix).await {
                Ok(n) => removed += n,
                Err(e) => self.fault("delete", &prefix, &e),
            }
        }
        removed += self.predictive.remove_user(&scoped_user_id(user_id)).await;
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(user_id, removed, "user cache invalidated");
        removed
    }

    /// 用户偏好变更
    pub async fn on_preference_change(&self, user_id: &str) -> usize {
        self.invalidate_user(user_id).await
    }

    /// 风险状态进入 Critical 时，清除该用户的缓存计划和近期任务结果
    pub async fn on_risk_transition(&self, user_id: &str, level: RiskLevel) -> usize {
        if level != RiskLevel::Critical {
            return 0;
        }
        tracing::warn!(user_id, "critical risk, invalidating user cache");
        self.invalidate_user(user_id).await
    }

    pub async fn purge_expired(&self) -> usize {
        let mut purged = self.local.purge_expired().await;
        if let Some(shared) = &self.shared {
            match shared.purge_expired().await {
                Ok(n) => purged += n,
                Err(e) => self.fault("purge", "*", &e),
            }
        }
        purged += self.predictive.purge_expired().await;
        purged
    }

    /// 预热 Tier 3（由宿主进程的维护任务调用）
    pub async fn warm_predictive(&self) -> usize {
        self.predictive
            .warm(self.policy.config().predictive_min_hits)
            .await
    }

    pub async fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            local_hits: c.local_hits.load(Ordering::Relaxed),
            shared_hits: c.shared_hits.load(Ordering::Relaxed),
            predictive_hits: c.predictive_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            rejected_writes: c.rejected_writes.load(Ordering::Relaxed),
            store_faults: c.store_faults.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            local_entries: self.local.len().await,
            predictive_entries: self.predictive.len().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemorySharedStore;
    use crate::workflow::TaskKind;
    use serde_json::json;

    fn hierarchy_with_store() -> (CacheHierarchy, Arc<InMemorySharedStore>) {
        let store = Arc::new(InMemorySharedStore::new());
        let cache = CacheHierarchy::new(CacheSection::default(), Some(store.clone()));
        (cache, store)
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let (cache, _) = hierarchy_with_store();
        let key = CacheKey::task(TaskKind::EmotionAnalyzer, "u1", "I'm sad");
        let ctx = CacheContext::new("u1").for_task(TaskKind::EmotionAnalyzer);
        assert!(cache.set(&key, json!({"x": 1}), &ctx, CacheStrategy::Auto).await);

        let hit = cache.get(&key, &ctx).await.unwrap();
        assert_eq!(hit.value, json!({"x": 1}));
        assert_eq!(hit.tier, CacheTier::Local);
        assert!(hit.authoritative);
    }

    #[tokio::test]
    async fn test_sensitive_round_trip_misses() {
        let (cache, _) = hierarchy_with_store();
        let key = CacheKey::task(TaskKind::SupportAdvisor, "u1", "msg");
        let ctx = CacheContext::new("u1")
            .for_task(TaskKind::SupportAdvisor)
            .sensitive(true);
        assert!(!cache.set(&key, json!(1), &ctx, CacheStrategy::Durable).await);
        assert!(cache.get(&key, &ctx).await.is_none());
        assert_eq!(cache.stats().await.rejected_writes, 1);
    }

    #[tokio::test]
    async fn test_low_confidence_round_trip_misses() {
        let (cache, _) = hierarchy_with_store();
        let key = CacheKey::task(TaskKind::EmotionAnalyzer, "u1", "msg");
        let ctx = CacheContext::new("u1")
            .for_task(TaskKind::EmotionAnalyzer)
            .with_confidence(0.1);
        assert!(!cache.set(&key, json!(1), &ctx, CacheStrategy::Auto).await);
        assert!(cache.get(&key, &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_shared_hit_promoted_to_local() {
        let store = Arc::new(InMemorySharedStore::new());
        let writer = CacheHierarchy::new(CacheSection::default(), Some(store.clone()));
        let reader = CacheHierarchy::new(CacheSection::default(), Some(store.clone()));
        let key = CacheKey::task(TaskKind::ContextMemory, "u1", "msg");
        let ctx = CacheContext::new("u1").for_task(TaskKind::ContextMemory);
        writer.set(&key, json!("ctx"), &ctx, CacheStrategy::Auto).await;

        let first = reader.get(&key, &ctx).await.unwrap();
        assert_eq!(first.tier, CacheTier::Shared);
        let second = reader.get(&key, &ctx).await.unwrap();
        assert_eq!(second.tier, CacheTier::Local);
        assert_eq!(second.origin, CacheTier::Shared);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_miss() {
        let (cache, store) = hierarchy_with_store();
        store.set_available(false);
        let key = CacheKey::task(TaskKind::ContextMemory, "u1", "msg");
        let ctx = CacheContext::new("u1").for_task(TaskKind::ContextMemory);

        // Tier 1 仍然可用
        assert!(cache.set(&key, json!(1), &ctx, CacheStrategy::Durable).await);
        assert!(cache.get(&key, &ctx).await.is_some());

        let other = CacheKey::task(TaskKind::ContextMemory, "u1", "other");
        assert!(cache.get(&other, &ctx).await.is_none());
        assert!(cache.stats().await.store_faults >= 2);
    }

    #[tokio::test]
    async fn test_critical_transition_invalidates_user() {
        let (cache, store) = hierarchy_with_store();
        let plan_key = CacheKey::plan("u1", "msg");
        let task_key = CacheKey::task(TaskKind::ContextMemory, "u1", "msg");
        let other_user = CacheKey::plan("u2", "msg");
        let ctx = CacheContext::new("u1");
        cache.set(&plan_key, json!("simple"), &ctx, CacheStrategy::Durable).await;
        cache
            .set(&task_key, json!(1), &ctx.clone().for_task(TaskKind::ContextMemory), CacheStrategy::Durable)
            .await;
        cache
            .set(&other_user, json!("simple"), &CacheContext::new("u2"), CacheStrategy::Durable)
            .await;

        assert_eq!(cache.on_risk_transition("u1", RiskLevel::High).await, 0);
        assert!(cache.on_risk_transition("u1", RiskLevel::Critical).await >= 2);
        assert!(cache.get(&plan_key, &ctx).await.is_none());
        assert!(cache
            .get(&task_key, &ctx.clone().for_task(TaskKind::ContextMemory))
            .await
            .is_none());
        assert!(cache.get(&other_user, &CacheContext::new("u2")).await.is_some());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_predictive_hit_is_a_hint() {
        let mut cfg = CacheSection::default();
        cfg.predictive_min_hits = 2;
        let cache = CacheHierarchy::new(cfg, None);
        let ctx = CacheContext::new("u1").for_task(TaskKind::ContextMemory);
        for msg in ["first", "second"] {
            let key = CacheKey::task(TaskKind::ContextMemory, "u1", msg);
            cache.set(&key, json!("same summary"), &ctx, CacheStrategy::LocalOnly).await;
        }
        assert_eq!(cache.warm_predictive().await, 1);

        let unseen = CacheKey::task(TaskKind::ContextMemory, "u1", "a brand new message");
        let hit = cache.get(&unseen, &ctx).await.unwrap();
        assert_eq!(hit.tier, CacheTier::Predictive);
        assert!(!hit.authoritative);

        // 提升到 Tier 1 后仍然不是权威结果
        let again = cache.get(&unseen, &ctx).await.unwrap();
        assert_eq!(again.tier, CacheTier::Local);
        assert!(!again.authoritative);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promoted_shared_hit_uses_min_ttl() {
        let store = Arc::new(InMemorySharedStore::new());
        let writer = CacheHierarchy::new(CacheSection::default(), Some(store.clone()));
        let reader = CacheHierarchy::new(CacheSection::default(), Some(store.clone()));
        // 稳定任务：共享层 TTL 远长于最短 TTL
        let key = CacheKey::task(TaskKind::ContextMemory, "u1", "msg");
        let ctx = CacheContext::new("u1").for_task(TaskKind::ContextMemory);
        writer.set(&key, json!("ctx"), &ctx, CacheStrategy::Auto).await;

        assert_eq!(reader.get(&key, &ctx).await.unwrap().tier, CacheTier::Shared);
        tokio::time::advance(Duration::from_secs(301)).await;
        // Tier 1 的副本已过期，再次从共享层读取
        assert_eq!(reader.get(&key, &ctx).await.unwrap().tier, CacheTier::Shared);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_prunes_predictive_tier() {
        let mut cfg = CacheSection::default();
        cfg.predictive_min_hits = 1;
        let cache = CacheHierarchy::new(cfg, None);
        let ctx = CacheContext::new("u1").for_task(TaskKind::ContextMemory);
        let key = CacheKey::task(TaskKind::ContextMemory, "u1", "first");
        cache.set(&key, json!("stale"), &ctx, CacheStrategy::LocalOnly).await;
        assert_eq!(cache.warm_predictive().await, 1);

        tokio::time::advance(Duration::from_secs(30 * 24 * 60 * 60)).await;
        assert!(cache.purge_expired().await >= 2);
        assert_eq!(cache.stats().await.predictive_entries, 0);

        let unseen = CacheKey::task(TaskKind::ContextMemory, "u1", "a new message");
        assert!(cache.get(&unseen, &ctx).await.is_none());
    }
}
