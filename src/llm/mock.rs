//! Mock LLM 客户端（用于测试与本地运行，无需 API）
//!
//! 从 System 消息中的 `task: <kind>` 标记识别任务种类，按种类返回固定 JSON。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, LlmError, Message, Role};
use crate::workflow::TaskKind;

/// Mock 客户端
#[derive(Debug, Default, Clone)]
pub struct MockLlmClient {
    latency: Option<Duration>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用前等待固定时长（模拟慢后端）
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

fn task_marker(messages: &[Message]) -> Option<TaskKind> {
    messages
        .iter()
        .filter(|m| m.role == Role::System)
        .find_map(|m| {
            m.content.lines().find_map(|line| {
                line.trim()
                    .strip_prefix("task:")
                    .and_then(|name| TaskKind::from_name(name.trim()))
            })
        })
}

fn primary_emotion(message: &str) -> (&'static str, f32, f32) {
    let lowered = message.to_lowercase();
    let table: [(&str, &str, f32, f32); 5] = [
        ("anxious", "anxiety", 0.65, -0.5),
        ("stressed", "stress", 0.6, -0.45),
        ("sad", "sadness", 0.55, -0.6),
        ("lonely", "loneliness", 0.5, -0.5),
        ("good", "contentment", 0.4, 0.6),
    ];
    table
        .iter()
        .find(|(marker, ..)| lowered.contains(marker))
        .map(|(_, emotion, intensity, valence)| (*emotion, *intensity, *valence))
        .unwrap_or(("neutral", 0.2, 0.0))
}

fn canned(kind: TaskKind, user_message: &str) -> serde_json::Value {
    match kind {
        TaskKind::CheckInResponder => json!({
            "payload": { "reply": "Thanks for checking in. It sounds like today is going okay, and I'm glad you shared that." },
            "confidence": 0.85,
            "reasoning": "short positive check-in",
            "insights": []
        }),
        TaskKind::EmotionAnalyzer => {
            let (emotion, intensity, valence) = primary_emotion(user_message);
            json!({
                "payload": { "primary_emotion": emotion, "intensity": intensity, "valence": valence },
                "confidence": 0.8,
                "reasoning": "keyword-level emotion reading",
                "insights": [format!("primary emotion: {}", emotion)]
            })
        }
        TaskKind::ContextMemory => json!({
            "payload": { "summary": "No earlier conversation on record for this user.", "themes": [] },
            "confidence": 0.7,
            "reasoning": "no stored history",
            "insights": []
        }),
        TaskKind::ProgressTracker => json!({
            "payload": {
                "goals": ["keep a steady routine"],
                "momentum": "steady",
                "encouragement": "You're putting real effort in, and that counts."
            },
            "confidence": 0.7,
            "reasoning": "goal language detected",
            "insights": ["user is tracking a personal goal"]
        }),
        TaskKind::SupportAdvisor => json!({
            "payload": {
                "reply": "That sounds like a lot to carry. Let's take it one step at a time: what feels most pressing right now?",
                "techniques": ["grounding", "breaking problems into small steps"]
            },
            "confidence": 0.8,
            "reasoning": "supportive reflection with one concrete next step",
            "insights": []
        }),
        TaskKind::RiskResponder => json!({
            "payload": {
                "safety_message": "Your safety matters. If you might act on these thoughts, please call or text 988 or contact local emergency services now.",
                "resources": ["988 Suicide & Crisis Lifeline", "Local emergency services"]
            },
            "confidence": 0.9,
            "reasoning": "crisis language present",
            "insights": []
        }),
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let kind = task_marker(messages)
            .ok_or_else(|| LlmError::Request("mock client needs a task marker".to_string()))?;
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        Ok(canned(kind, last_user).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_by_task_marker() {
        let client = MockLlmClient::new();
        let messages = vec![
            Message::system("You are a helper.\ntask: emotion_analyzer"),
            Message::user("I'm so anxious"),
        ];
        let out = client.complete(&messages).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["payload"]["primary_emotion"], "anxiety");
    }

    #[tokio::test]
    async fn test_mock_without_marker_fails() {
        let client = MockLlmClient::new();
        let err = client.complete(&[Message::user("hello")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Request(_)));
    }
}
