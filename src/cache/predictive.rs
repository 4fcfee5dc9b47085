//! Tier 3：预测层
//!
//! 按 (用户, 段) 记录近期的任务输出；后台预热任务把重复出现的输出提升为推测条目。
//! 推测条目只作为提示，从不作为权威结果。
//! 条目与观测都有寿命（缓存 TTL 上限），过期后不再提供，并由 purge_expired 回收。

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

type Slot = (String, String);

#[derive(Debug, Clone)]
struct Observation {
    value: Value,
    /// 同一输出连续出现的次数
    repeats: usize,
    last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct PredictiveEntry {
    pub value: Value,
    pub observed: usize,
    pub warmed_at: Instant,
    pub expires_at: Instant,
}

impl PredictiveEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

pub struct PredictiveTier {
    max_age: Duration,
    observations: RwLock<HashMap<Slot, Observation>>,
    entries: RwLock<HashMap<Slot, PredictiveEntry>>,
}

impl PredictiveTier {
    /// max_age：条目和观测的最长寿命
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            observations: RwLock::new(HashMap::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// 正常任务完成时调用：只记录，不直接写入推测条目
    pub async fn observe(&self, user_id: &str, segment: &str, value: &Value) {
        let mut observations = self.observations.write().await;
        let slot = (user_id.to_string(), segment.to_string());
        let now = Instant::now();
        match observations.get_mut(&slot) {
            Some(obs) if obs.value == *value => {
                obs.repeats += 1;
                obs.last_seen = now;
            }
            _ => {
                observations.insert(
                    slot,
                    Observation {
                        value: value.clone(),
                        repeats: 1,
                        last_seen: now,
                    },
                );
            }
        }
    }

    pub async fn get(&self, user_id: &str, segment: &str) -> Option<PredictiveEntry> {
        self.entries
            .read()
            .await
            .get(&(user_id.to_string(), segment.to_string()))
            .filter(|entry| !entry.is_expired(Instant::now()))
            .cloned()
    }

    /// 把重复次数达到阈值、仍未过期的观测提升为推测条目；返回新写入/刷新的条数
    pub async fn warm(&self, min_repeats: usize) -> usize {
        let now = Instant::now();
        let candidates: Vec<(Slot, Observation)> = self
            .observations
            .read()
            .await
            .iter()
            .filter(|(_, obs)| obs.repeats >= min_repeats.max(1) && obs.last_seen + self.max_age > now)
            .map(|(slot, obs)| (slot.clone(), obs.clone()))
            .collect();

        let mut entries = self.entries.write().await;
        for (slot, obs) in &candidates {
            entries.insert(
                slot.clone(),
                PredictiveEntry {
                    value: obs.value.clone(),
                    observed: obs.repeats,
                    warmed_at: now,
                    expires_at: now + self.max_age,
                },
            );
        }
        candidates.len()
    }

    pub async fn remove_user(&self, user_id: &str) -> usize {
        let mut removed = 0;
        {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|(user, _), _| user != user_id);
            removed += before - entries.len();
        }
        self.observations
            .write()
            .await
            .retain(|(user, _), _| user != user_id);
        removed
    }

    /// 删除过期条目和过旧的观测；返回删除的条目数
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let purged = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            before - entries.len()
        };
        self.observations
            .write()
            .await
            .retain(|_, obs| obs.last_seen + self.max_age > now);
        purged
    }

    pub async fn observation_count(&self) -> usize {
        self.observations.read().await.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn test_observations_are_not_served_until_warmed() {
        let tier = PredictiveTier::new(DAY);
        for _ in 0..3 {
            tier.observe("u1", "context_memory", &json!({"summary": "job"})).await;
        }
        assert!(tier.get("u1", "context_memory").await.is_none());

        assert_eq!(tier.warm(3).await, 1);
        let entry = tier.get("u1", "context_memory").await.unwrap();
        assert_eq!(entry.observed, 3);
    }

    #[tokio::test]
    async fn test_changed_output_resets_repeat_count() {
        let tier = PredictiveTier::new(DAY);
        tier.observe("u1", "emotion_analyzer", &json!(1)).await;
        tier.observe("u1", "emotion_analyzer", &json!(1)).await;
        tier.observe("u1", "emotion_analyzer", &json!(2)).await;
        assert_eq!(tier.warm(2).await, 0);
    }

    #[tokio::test]
    async fn test_remove_user() {
        let tier = PredictiveTier::new(DAY);
        tier.observe("u1", "plan", &json!(1)).await;
        tier.observe("u2", "plan", &json!(1)).await;
        tier.warm(1).await;
        assert_eq!(tier.remove_user("u1").await, 1);
        assert!(tier.get("u1", "plan").await.is_none());
        assert!(tier.get("u2", "plan").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_and_observations_expire() {
        let tier = PredictiveTier::new(DAY);
        tier.observe("u1", "context_memory", &json!("stale")).await;
        tier.observe("u2", "context_memory", &json!("fresh")).await;
        assert_eq!(tier.warm(1).await, 2);

        tokio::time::advance(Duration::from_secs(30 * 24 * 60 * 60)).await;
        tier.observe("u2", "context_memory", &json!("fresh")).await;

        // 过期条目在回收之前也不会被提供
        assert!(tier.get("u1", "context_memory").await.is_none());
        assert_eq!(tier.purge_expired().await, 2);
        assert!(tier.is_empty().await);
        assert_eq!(tier.observation_count().await, 1);

        // 过旧的观测不会被重新预热
        assert_eq!(tier.warm(1).await, 1);
        assert!(tier.get("u1", "context_memory").await.is_none());
        assert!(tier.get("u2", "context_memory").await.is_some());
    }
}
