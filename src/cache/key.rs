//! 缓存键：段（任务名或 plan）+ 归一化输入哈希 + 用户 ID
//!
//! 字符串形式 `attune:{user}:{segment}:{hash}`，同一用户的所有键共享前缀，便于按用户失效。

use std::fmt;

use crate::risk::lexicon::normalize;
use crate::workflow::TaskKind;

const KEY_NAMESPACE: &str = "attune";
/// 计划分类缓存使用的段名
pub const PLAN_SEGMENT: &str = "plan";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    user_id: String,
    segment: String,
    input_hash: u64,
}

impl CacheKey {
    pub fn task(kind: TaskKind, user_id: &str, message: &str) -> Self {
        Self::new(kind.as_str(), user_id, message)
    }

    pub fn plan(user_id: &str, message: &str) -> Self {
        Self::new(PLAN_SEGMENT, user_id, message)
    }

    fn new(segment: &str, user_id: &str, message: &str) -> Self {
        Self {
            user_id: scoped_user_id(user_id),
            segment: segment.to_string(),
            input_hash: fnv1a(normalize_input(message).as_bytes()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    pub fn input_hash(&self) -> u64 {
        self.input_hash
    }

    /// 某个用户全部键的公共前缀
    pub fn user_prefix(user_id: &str) -> String {
        format!("{}:{}:", KEY_NAMESPACE, scoped_user_id(user_id))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{:016x}",
            KEY_NAMESPACE, self.user_id, self.segment, self.input_hash
        )
    }
}

/// 小写、统一引号、压缩空白
pub fn normalize_input(message: &str) -> String {
    normalize(message)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 转义后的用户 ID；原样的分隔符会破坏前缀匹配
pub fn scoped_user_id(user_id: &str) -> String {
    user_id.replace('%', "%25").replace(':', "%3A").replace('*', "%2A")
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ *b as u64).wrapping_mul(PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_inputs_share_a_key() {
        let a = CacheKey::task(TaskKind::EmotionAnalyzer, "u1", "I feel  Sad today");
        let b = CacheKey::task(TaskKind::EmotionAnalyzer, "u1", "i feel sad today ");
        assert_eq!(a, b);
        assert_ne!(a, CacheKey::task(TaskKind::ContextMemory, "u1", "i feel sad today"));
        assert_ne!(a, CacheKey::task(TaskKind::EmotionAnalyzer, "u2", "i feel sad today"));
    }

    #[test]
    fn test_key_string_starts_with_user_prefix() {
        let key = CacheKey::plan("u1", "hello");
        assert!(key.to_string().starts_with(&CacheKey::user_prefix("u1")));
        assert!(key.to_string().contains(":plan:"));
    }

    #[test]
    fn test_user_ids_cannot_spoof_prefix() {
        let key = CacheKey::plan("u1:plan", "hello");
        assert!(!key.to_string().starts_with(&CacheKey::user_prefix("u1")));
    }
}
