//! 每种任务的 system prompt
//!
//! 第一行固定为 `task: <kind>`，便于日志与 Mock 客户端识别任务种类。

use crate::agents::{TaskInput, TaskPayload};
use crate::workflow::TaskKind;

const OUTPUT_CONTRACT: &str = "Reply with a single JSON object and nothing else: \
{\"payload\": {...}, \"confidence\": <0..1>, \"reasoning\": \"...\", \"insights\": [\"...\"]}";

fn role_and_shape(kind: TaskKind) -> (&'static str, &'static str) {
    match kind {
        TaskKind::CheckInResponder => (
            "You answer brief wellbeing check-ins warmly and in two sentences at most.",
            "{\"reply\": string}",
        ),
        TaskKind::EmotionAnalyzer => (
            "You identify the main emotion in the user's message.",
            "{\"primary_emotion\": string, \"intensity\": 0..1, \"valence\": -1..1}",
        ),
        TaskKind::ContextMemory => (
            "You summarise what is known about the user's ongoing situation and recurring themes.",
            "{\"summary\": string, \"themes\": [string]}",
        ),
        TaskKind::ProgressTracker => (
            "You track the user's goals and how they are progressing.",
            "{\"goals\": [string], \"momentum\": \"rising\"|\"steady\"|\"slipping\", \"encouragement\": string}",
        ),
        TaskKind::SupportAdvisor => (
            "You write a supportive reply with one or two practical coping techniques, using the analysis provided.",
            "{\"reply\": string, \"techniques\": [string]}",
        ),
        TaskKind::RiskResponder => (
            "The user may be at risk. Write a calm, direct safety message and list crisis resources (include 988).",
            "{\"safety_message\": string, \"resources\": [string]}",
        ),
    }
}

/// system prompt：任务标记 + 角色 + 输出契约
pub fn system_prompt(kind: TaskKind) -> String {
    let (role, shape) = role_and_shape(kind);
    format!(
        "task: {}\n{}\n\n{}\nThe payload must have this shape: {}",
        kind.as_str(),
        role,
        OUTPUT_CONTRACT,
        shape
    )
}

/// user 消息：原文 + 风险摘要 + 前置结果 + 预测提示
pub fn user_prompt(input: &TaskInput) -> String {
    let mut prompt = format!(
        "Message: {}\nRisk level: {} (immediacy {:.1})",
        input.message,
        input.risk.level.as_str(),
        input.risk.immediacy
    );

    if !input.prerequisites.is_empty() {
        prompt.push_str("\n\nAnalysis from earlier steps:");
        for (kind, payload) in &input.prerequisites {
            prompt.push_str(&format!("\n- {}: {}", kind, render(payload)));
        }
    }
    if let Some(hint) = &input.hint {
        prompt.push_str(&format!(
            "\n\nA previous answer for a similar message (may be stale): {}",
            render(hint)
        ));
    }
    prompt
}

fn render(payload: &TaskPayload) -> String {
    serde_json::to_string(payload).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskScore, RiskSummary};
    use std::collections::BTreeMap;

    #[test]
    fn test_system_prompt_starts_with_task_marker() {
        for kind in TaskKind::all() {
            let prompt = system_prompt(kind);
            assert_eq!(
                prompt.lines().next(),
                Some(format!("task: {}", kind.as_str()).as_str())
            );
        }
    }

    #[test]
    fn test_user_prompt_lists_prerequisites() {
        let mut prerequisites = BTreeMap::new();
        prerequisites.insert(
            TaskKind::ContextMemory,
            TaskPayload::Context {
                summary: "new job".into(),
                themes: vec![],
            },
        );
        let input = TaskInput {
            kind: TaskKind::SupportAdvisor,
            message: "work is hard".into(),
            user_id: "u1".into(),
            conversation_id: None,
            risk: RiskSummary::from(&RiskScore::conservative()),
            prerequisites,
            hint: None,
        };
        let prompt = user_prompt(&input);
        assert!(prompt.contains("context_memory"));
        assert!(prompt.contains("new job"));
    }
}
