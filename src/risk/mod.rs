//! 危机风险评分：预编译短语索引 + 确定性评分器（位于每个请求的关键路径上）

pub mod lexicon;
pub mod scorer;

use serde::Serialize;
use thiserror::Error;

pub use lexicon::{IndicatorKind, Lexicon, RiskCategory, Urgency};
pub use scorer::{CulturalContext, RiskLevel, RiskScore, RiskScorer, CRITICAL_THRESHOLD};

/// 评分器内部故障（仅在内部流转，从不抛给调用方）
#[derive(Error, Debug, Clone)]
pub enum RiskError {
    #[error("Risk lexicon is empty")]
    EmptyLexicon,
    #[error("Invalid lexicon pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Risk scoring panicked")]
    Panicked,
}

/// 响应元数据中的风险摘要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSummary {
    pub level: RiskLevel,
    pub aggregate: f32,
    pub immediacy: f32,
    pub confidence: f32,
}

impl From<&RiskScore> for RiskSummary {
    fn from(score: &RiskScore) -> Self {
        Self {
            level: score.level,
            aggregate: score.aggregate,
            immediacy: score.immediacy,
            confidence: score.confidence,
        }
    }
}
