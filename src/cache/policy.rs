//! 缓存策略：可缓存性判定、自适应 TTL、是否写入共享层

use std::time::Duration;

use crate::config::CacheSection;
use crate::workflow::TaskKind;

/// 读写缓存时由调用方提供的上下文
#[derive(Debug, Clone)]
pub struct CacheContext {
    pub user_id: String,
    pub task: Option<TaskKind>,
    pub confidence: f32,
    /// 安全敏感（High / Critical 风险）的内容永不缓存
    pub sensitive: bool,
}

impl CacheContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            task: None,
            confidence: 1.0,
            sensitive: false,
        }
    }

    pub fn for_task(mut self, task: TaskKind) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }
}

/// 写入策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// 只写 Tier 1
    LocalOnly,
    /// 同时写 Tier 2
    Durable,
    /// 稳定任务或高置信度时写 Tier 2
    Auto,
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    cfg: CacheSection,
}

impl CachePolicy {
    pub fn new(cfg: CacheSection) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CacheSection {
        &self.cfg
    }

    pub fn is_cacheable(&self, ctx: &CacheContext) -> bool {
        !ctx.sensitive
            && ctx.confidence.is_finite()
            && ctx.confidence >= self.cfg.confidence_floor
            && ctx.task.map_or(true, |t| t.is_cacheable())
    }

    /// ttl = base × 任务系数 × 置信度，限制在 [min, max]
    pub fn ttl(&self, ctx: &CacheContext) -> Duration {
        let multiplier = ctx.task.map_or(1.0, |t| t.ttl_multiplier());
        let confidence = ctx.confidence.clamp(0.0, 1.0) as f64;
        let secs = self.cfg.base_ttl_secs as f64 * multiplier * confidence;
        let min = self.cfg.min_ttl_secs as f64;
        let max = (self.cfg.max_ttl_secs as f64).max(min);
        Duration::from_secs(secs.clamp(min, max).round() as u64)
    }

    pub fn is_durable(&self, ctx: &CacheContext, strategy: CacheStrategy) -> bool {
        if !self.cfg.shared_enabled {
            return false;
        }
        match strategy {
            CacheStrategy::LocalOnly => false,
            CacheStrategy::Durable => true,
            CacheStrategy::Auto => {
                ctx.task.is_some_and(|t| t.is_stable())
                    || ctx.confidence >= self.cfg.durable_confidence
            }
        }
    }
}
