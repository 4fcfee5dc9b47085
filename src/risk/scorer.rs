//! 危机风险评分器
//!
//! 纯函数：文本 + 可选文化语境 -> RiskScore。确定性、无副作用、单遍扫描。
//! 内部任何故障都不会抛给调用方，而是返回保守的非零默认分（≥ Moderate）。

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::risk::lexicon::{normalize, IndicatorKind, Lexicon, RiskCategory, Urgency};
use crate::risk::RiskError;

/// 总分达到该值即为 Critical
pub const CRITICAL_THRESHOLD: f32 = 7.0;
/// 保护性因素的总扣减上限
pub const MAX_PROTECTIVE_REDUCTION: f32 = 2.0;
/// 文化调整的绝对上限
pub const MAX_CULTURAL_ADJUSTMENT: f32 = 0.5;
/// 故障时返回的保守总分（Moderate 区间）
pub const CONSERVATIVE_AGGREGATE: f32 = 4.0;

/// 同类别重复命中的频次加分上限
const MAX_FREQUENCY_BONUS: f32 = 1.5;
/// 短输入阈值（词数）
const SHORT_INPUT_WORDS: usize = 4;

/// 风险等级（由总分映射）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_aggregate(aggregate: f32) -> Self {
        if aggregate >= CRITICAL_THRESHOLD {
            RiskLevel::Critical
        } else if aggregate >= 5.0 {
            RiskLevel::High
        } else if aggregate >= 3.0 {
            RiskLevel::Moderate
        } else if aggregate >= 0.5 {
            RiskLevel::Low
        } else {
            RiskLevel::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// 文化语境：只允许对总分做 ±0.5 以内的微调，且永不改变是否 Critical
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CulturalContext {
    /// 倾向含蓄表达痛苦（上调）
    #[serde(default)]
    pub indirect_expression: bool,
    /// 求助污名化程度 0–1（上调）
    #[serde(default)]
    pub help_seeking_stigma: f32,
    /// 日常用语中夸张表达常见（下调）
    #[serde(default)]
    pub hyperbolic_idioms: bool,
}

impl CulturalContext {
    /// 原始调整量，已截断到 [-limit, limit]
    pub fn adjustment(&self, limit: f32) -> f32 {
        let limit = limit.clamp(0.0, MAX_CULTURAL_ADJUSTMENT);
        let mut adj = 0.0;
        if self.indirect_expression {
            adj += 0.3;
        }
        adj += 0.2 * self.help_seeking_stigma.clamp(0.0, 1.0);
        if self.hyperbolic_idioms {
            adj -= 0.3;
        }
        adj.clamp(-limit, limit)
    }
}

/// 单条消息的风险评估，计算一次后不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    /// 各类别 0–10 分
    pub categories: BTreeMap<RiskCategory, f32>,
    /// 总分 0–10
    pub aggregate: f32,
    pub level: RiskLevel,
    /// 紧迫度 0–10
    pub immediacy: f32,
    /// 置信度 0–1
    pub confidence: f32,
    pub risk_indicators: Vec<String>,
    pub protective_indicators: Vec<String>,
    /// 评分器内部故障时返回的保守默认值
    #[serde(default)]
    pub degraded: bool,
}

impl RiskScore {
    /// 保守默认值：绝不返回 none
    pub fn conservative() -> Self {
        Self {
            categories: RiskCategory::all().into_iter().map(|c| (c, 0.0)).collect(),
            aggregate: CONSERVATIVE_AGGREGATE,
            level: RiskLevel::from_aggregate(CONSERVATIVE_AGGREGATE),
            immediacy: 0.0,
            confidence: 0.1,
            risk_indicators: Vec::new(),
            protective_indicators: Vec::new(),
            degraded: true,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.level == RiskLevel::Critical
    }

    /// 是否属于安全敏感（High 及以上不得进入缓存）
    pub fn is_sensitive(&self) -> bool {
        self.level >= RiskLevel::High
    }

    pub fn category(&self, category: RiskCategory) -> f32 {
        self.categories.get(&category).copied().unwrap_or(0.0)
    }
}

/// 风险评分器；词表在构造时编译一次
#[derive(Debug)]
pub struct RiskScorer {
    lexicon: Result<Lexicon, RiskError>,
    max_cultural_adjustment: f32,
}

impl RiskScorer {
    pub fn new() -> Self {
        Self::from_lexicon(Lexicon::builtin())
    }

    /// 词表构建失败时评分器仍可用，只是每次都返回保守默认值
    pub fn from_lexicon(lexicon: Result<Lexicon, RiskError>) -> Self {
        if let Err(e) = &lexicon {
            tracing::error!(error = %e, "risk lexicon unavailable, scorer will return conservative scores");
        }
        Self {
            lexicon,
            max_cultural_adjustment: MAX_CULTURAL_ADJUSTMENT,
        }
    }

    pub fn with_max_cultural_adjustment(mut self, limit: f32) -> Self {
        self.max_cultural_adjustment = limit.clamp(0.0, MAX_CULTURAL_ADJUSTMENT);
        self
    }

    /// 评分入口：永不失败
    pub fn score(&self, text: &str, cultural: Option<&CulturalContext>) -> RiskScore {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.try_score(text, cultural)))
            .unwrap_or(Err(RiskError::Panicked));
        match outcome {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(error = %e, "risk scoring fault, returning conservative score");
                RiskScore::conservative()
            }
        }
    }

    fn try_score(
        &self,
        text: &str,
        cultural: Option<&CulturalContext>,
    ) -> Result<RiskScore, RiskError> {
        let lexicon = self.lexicon.as_ref().map_err(|e| e.clone())?;
        let normalized = normalize(text);
        let matches = lexicon.scan(&normalized);

        let mut max_weight: BTreeMap<RiskCategory, f32> = BTreeMap::new();
        let mut hits: BTreeMap<RiskCategory, usize> = BTreeMap::new();
        let mut risk_indicators: Vec<String> = Vec::new();
        let mut protective_indicators: Vec<String> = Vec::new();
        let mut reduction = 0.0_f32;
        let mut immediate = false;
        let mut time_reference = false;

        for m in &matches {
            match m.kind {
                IndicatorKind::Risk {
                    category,
                    weight,
                    urgency,
                } => {
                    let entry = max_weight.entry(category).or_insert(0.0);
                    *entry = entry.max(weight);
                    *hits.entry(category).or_insert(0) += 1;
                    immediate |= urgency == Urgency::Immediate;
                    if !risk_indicators.iter().any(|p| p == m.phrase) {
                        risk_indicators.push(m.phrase.to_string());
                    }
                }
                IndicatorKind::Protective { reduction: r } => {
                    reduction += r;
                    if !protective_indicators.iter().any(|p| p == m.phrase) {
                        protective_indicators.push(m.phrase.to_string());
                    }
                }
                IndicatorKind::TimeReference => time_reference = true,
            }
        }

        let categories: BTreeMap<RiskCategory, f32> = RiskCategory::all()
            .into_iter()
            .map(|c| {
                let base = max_weight.get(&c).copied().unwrap_or(0.0);
                let count = hits.get(&c).copied().unwrap_or(0);
                let bonus = if count > 1 {
                    (0.5 * (count - 1) as f32).min(MAX_FREQUENCY_BONUS)
                } else {
                    0.0
                };
                (c, (base + bonus).clamp(0.0, 10.0))
            })
            .collect();

        let primary = categories.values().copied().fold(0.0_f32, f32::max);
        let co_occurring: f32 = categories.values().sum::<f32>() - primary;
        let mut aggregate = primary + 0.2 * co_occurring;
        aggregate -= reduction.min(MAX_PROTECTIVE_REDUCTION);
        if immediate {
            aggregate = aggregate.max(CRITICAL_THRESHOLD);
        }
        let mut aggregate = aggregate.clamp(0.0, 10.0);

        if let Some(ctx) = cultural {
            if aggregate > 0.0 {
                aggregate = apply_cultural(aggregate, ctx.adjustment(self.max_cultural_adjustment));
            }
        }

        let immediacy = if immediate {
            10.0
        } else if time_reference && primary > 0.0 {
            (4.0 + 0.7 * primary).min(10.0)
        } else {
            (primary * 0.5).min(5.0)
        };

        let word_count = normalized.split_whitespace().count();
        let confidence = confidence(&risk_indicators, word_count);

        Ok(RiskScore {
            categories,
            aggregate,
            level: RiskLevel::from_aggregate(aggregate),
            immediacy,
            confidence,
            risk_indicators,
            protective_indicators,
            degraded: false,
        })
    }
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// 文化调整不得单独改变 Critical 与否
fn apply_cultural(aggregate: f32, adjustment: f32) -> f32 {
    let adjusted = (aggregate + adjustment).clamp(0.0, 10.0);
    if aggregate >= CRITICAL_THRESHOLD {
        adjusted.max(CRITICAL_THRESHOLD)
    } else {
        adjusted.min(CRITICAL_THRESHOLD - 0.01)
    }
}

/// 短语越具体（多词）、独立命中越多，置信度越高；极短输入扣分
fn confidence(risk_indicators: &[String], word_count: usize) -> f32 {
    let mut conf = if risk_indicators.is_empty() {
        0.7
    } else {
        let independent = risk_indicators.len().min(3) as f32;
        let avg_words = risk_indicators
            .iter()
            .map(|p| p.split(' ').count())
            .sum::<usize>() as f32
            / risk_indicators.len() as f32;
        let specificity = (0.1 * (avg_words - 1.0)).clamp(0.0, 0.2);
        0.45 + 0.1 * independent + specificity
    };
    if word_count < SHORT_INPUT_WORDS {
        conf *= 0.75;
    }
    conf.clamp(0.05, 0.99)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> RiskScorer {
        RiskScorer::new()
    }

    #[test]
    fn test_positive_checkin_is_none() {
        let score = scorer().score("I'm feeling pretty good today", None);
        assert_eq!(score.level, RiskLevel::None);
        assert_eq!(score.aggregate, 0.0);
        assert_eq!(score.immediacy, 0.0);
        assert!(score.risk_indicators.is_empty());
    }

    #[test]
    fn test_self_injury_right_now_is_critical_and_immediate() {
        let score = scorer().score("I want to hurt myself right now", None);
        assert_eq!(score.level, RiskLevel::Critical);
        assert!(score.immediacy >= 9.0, "immediacy was {}", score.immediacy);
        assert!(score.category(RiskCategory::SelfInjury) >= 7.0);
        assert_eq!(score.risk_indicators, vec!["hurt myself".to_string()]);
    }

    #[test]
    fn test_immediate_phrase_sets_max_immediacy() {
        let score = scorer().score("I am going to kill myself", None);
        assert_eq!(score.immediacy, 10.0);
        assert!(score.is_critical());
    }

    #[test]
    fn test_immediate_phrase_not_reduced_below_critical_by_protective_factors() {
        let score = scorer().score(
            "I want to kill myself but my family and my therapist are reasons to live",
            None,
        );
        assert!(score.is_critical());
        assert_eq!(score.protective_indicators.len(), 3);
    }

    #[test]
    fn test_protective_reduction_is_bounded() {
        let with_protective = scorer().score(
            "I feel hopeless and worthless, but my family, my kids, my therapist, \
             a support group and a safety plan keep me hopeful",
            None,
        );
        // 4.0 - min(3.8, 2.0)
        assert!((with_protective.aggregate - 2.0).abs() < 1e-4);
        assert_eq!(with_protective.level, RiskLevel::Low);

        let base = scorer().score("I feel so hopeless", None);
        assert_eq!(base.level, RiskLevel::Moderate);
    }

    #[test]
    fn test_frequency_bonus() {
        let once = scorer().score("I feel hopeless about everything", None);
        let twice = scorer().score("I feel hopeless and worthless about everything", None);
        assert!(twice.category(RiskCategory::SelfHarm) > once.category(RiskCategory::SelfHarm));
    }

    #[test]
    fn test_cultural_adjustment_bounded() {
        let ctx = CulturalContext {
            indirect_expression: true,
            help_seeking_stigma: 1.0,
            hyperbolic_idioms: false,
        };
        assert_eq!(ctx.adjustment(2.0), MAX_CULTURAL_ADJUSTMENT);

        let plain = scorer().score("I feel so hopeless", None);
        let adjusted = scorer().score("I feel so hopeless", Some(&ctx));
        assert!((adjusted.aggregate - plain.aggregate - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_cultural_adjustment_never_flips_crisis() {
        let up = CulturalContext {
            indirect_expression: true,
            help_seeking_stigma: 1.0,
            hyperbolic_idioms: false,
        };
        // 6.5 + 0.5 本会越过阈值
        let below = scorer().score("I have been thinking about self harm", Some(&up));
        assert_ne!(below.level, RiskLevel::Critical);

        let down = CulturalContext {
            hyperbolic_idioms: true,
            ..Default::default()
        };
        let above = scorer().score("I want to hurt myself", Some(&down));
        assert_eq!(above.level, RiskLevel::Critical);
    }

    #[test]
    fn test_cultural_adjustment_does_not_raise_none() {
        let ctx = CulturalContext {
            indirect_expression: true,
            ..Default::default()
        };
        let score = scorer().score("Had a nice walk", Some(&ctx));
        assert_eq!(score.level, RiskLevel::None);
    }

    #[test]
    fn test_short_input_penalizes_confidence() {
        let short = scorer().score("suicidal", None);
        let long = scorer().score("I have been feeling suicidal for weeks", None);
        assert!(short.confidence < long.confidence);
    }

    #[test]
    fn test_scorer_fault_returns_conservative() {
        let broken = RiskScorer::from_lexicon(Err(RiskError::EmptyLexicon));
        let score = broken.score("I'm feeling pretty good today", None);
        assert!(score.degraded);
        assert!(score.level >= RiskLevel::Moderate);
        assert!(score.aggregate > 0.0);
    }

    #[test]
    fn test_deterministic() {
        let a = scorer().score("I can't go on like this tonight", None);
        let b = scorer().score("I can't go on like this tonight", None);
        assert_eq!(a.aggregate, b.aggregate);
        assert_eq!(a.immediacy, b.immediacy);
        assert_eq!(a.confidence, b.confidence);
    }
}
