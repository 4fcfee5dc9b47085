//! 三级缓存：进程内 LRU、共享 KV、预测层
//!
//! 读穿透 + 写提升；不可缓存的内容（安全敏感、低置信度、危机响应）永不写入。

pub mod hierarchy;
pub mod key;
pub mod local;
pub mod policy;
pub mod predictive;
pub mod shared;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

pub use hierarchy::{CacheHierarchy, CacheStats};
pub use key::CacheKey;
pub use local::LocalTier;
pub use policy::{CacheContext, CachePolicy, CacheStrategy};
pub use predictive::PredictiveTier;
pub use shared::{InMemorySharedStore, SharedStore, SharedTier};

/// 缓存层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Local,
    Shared,
    Predictive,
}

/// Tier 1 中的一条缓存
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// 条目最初来自哪一层（提升后仍保留）
    pub origin: CacheTier,
}

/// 一次命中
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub value: Value,
    /// 在哪一层命中
    pub tier: CacheTier,
    pub origin: CacheTier,
    /// 预测层来源的命中只能作为提示
    pub authoritative: bool,
}

/// 缓存故障：只在缓存内部流转，记录日志后按未命中处理
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
