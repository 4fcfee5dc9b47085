//! 回复合成器
//!
//! 从成功的任务结果中挑出影响力最大、带回复正文的结果作为主回复；
//! 整体置信度 = Σ(w·c) / Σw，w 为各结果的影响力权重；一致度 = 1 − (max c − min c)。

use serde::Serialize;

use crate::agents::TaskPayload;
use crate::workflow::{TaskKind, TaskResult};

/// 没有任何可用结果时的固定兜底回复
pub const FALLBACK_RESPONSE: &str = "I'm here with you, but I wasn't able to put together a full reply just now. \
Could you tell me a little more about how you're feeling? If you are in danger or thinking about harming yourself, \
please call or text 988 or contact your local emergency number.";

/// 危机计划立即返回的固定安全回复
pub const CRISIS_RESPONSE: &str = "I'm really glad you told me, and I'm taking what you said seriously. \
Your safety matters most right now. If you might act on these thoughts, please call or text 988 \
(Suicide & Crisis Lifeline) or call your local emergency number now. You don't have to go through this alone, \
and I'm here to keep talking with you.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedResponse {
    pub content: String,
    pub confidence: f32,
    pub agreement: f32,
    pub primary: Option<TaskKind>,
    pub fallback: bool,
}

impl SynthesizedResponse {
    pub fn fallback() -> Self {
        Self {
            content: FALLBACK_RESPONSE.to_string(),
            confidence: 0.0,
            agreement: 0.0,
            primary: None,
            fallback: true,
        }
    }

    pub fn crisis() -> Self {
        Self {
            content: CRISIS_RESPONSE.to_string(),
            confidence: 1.0,
            agreement: 1.0,
            primary: Some(TaskKind::RiskResponder),
            fallback: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseSynthesizer;

impl ResponseSynthesizer {
    pub fn new() -> Self {
        Self
    }

    pub fn synthesize(&self, results: &[TaskResult]) -> SynthesizedResponse {
        let usable: Vec<&TaskResult> = results
            .iter()
            .filter(|r| r.success && r.payload.is_some())
            .collect();

        let primary = usable
            .iter()
            .filter(|r| r.payload.as_ref().and_then(TaskPayload::reply).is_some())
            .max_by(|a, b| {
                (a.influence_weight * a.confidence)
                    .total_cmp(&(b.influence_weight * b.confidence))
            });
        let Some(primary) = primary else {
            return SynthesizedResponse::fallback();
        };

        let mut content = primary
            .payload
            .as_ref()
            .and_then(TaskPayload::reply)
            .unwrap_or_default()
            .to_string();

        // 进展跟踪的鼓励语附在主回复之后
        for result in &usable {
            if let Some(TaskPayload::Progress { encouragement, .. }) = &result.payload {
                if !encouragement.is_empty() && !content.contains(encouragement.as_str()) {
                    content.push(' ');
                    content.push_str(encouragement);
                }
            }
        }

        SynthesizedResponse {
            content,
            confidence: overall_confidence(&usable),
            agreement: agreement(&usable),
            primary: Some(primary.task),
            fallback: false,
        }
    }
}

fn overall_confidence(results: &[&TaskResult]) -> f32 {
    let weight: f32 = results.iter().map(|r| r.influence_weight).sum();
    if weight <= 0.0 {
        return 0.0;
    }
    let weighted: f32 = results
        .iter()
        .map(|r| r.influence_weight * r.confidence)
        .sum();
    (weighted / weight).clamp(0.0, 1.0)
}

fn agreement(results: &[&TaskResult]) -> f32 {
    let (min, max) = results
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), r| {
            (lo.min(r.confidence), hi.max(r.confidence))
        });
    if results.is_empty() {
        0.0
    } else {
        (1.0 - (max - min)).clamp(0.0, 1.0)
    }
}
