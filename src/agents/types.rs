//! 任务体边界：输入包、输出与各任务种类的强类型 payload

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::TaskError;
use crate::risk::RiskSummary;
use crate::workflow::TaskKind;

/// 各任务种类的结果形状（编译期已知）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    CheckIn {
        reply: String,
    },
    Emotion {
        primary_emotion: String,
        intensity: f32,
        valence: f32,
    },
    Context {
        summary: String,
        #[serde(default)]
        themes: Vec<String>,
    },
    Progress {
        #[serde(default)]
        goals: Vec<String>,
        momentum: String,
        encouragement: String,
    },
    Support {
        reply: String,
        #[serde(default)]
        techniques: Vec<String>,
    },
    Risk {
        safety_message: String,
        #[serde(default)]
        resources: Vec<String>,
    },
}

impl TaskPayload {
    /// 任务种类对应的 payload 标签
    pub fn tag_for(kind: TaskKind) -> &'static str {
        match kind {
            TaskKind::CheckInResponder => "check_in",
            TaskKind::EmotionAnalyzer => "emotion",
            TaskKind::ContextMemory => "context",
            TaskKind::ProgressTracker => "progress",
            TaskKind::SupportAdvisor => "support",
            TaskKind::RiskResponder => "risk",
        }
    }

    pub fn matches(&self, kind: TaskKind) -> bool {
        matches!(
            (self, kind),
            (TaskPayload::CheckIn { .. }, TaskKind::CheckInResponder)
                | (TaskPayload::Emotion { .. }, TaskKind::EmotionAnalyzer)
                | (TaskPayload::Context { .. }, TaskKind::ContextMemory)
                | (TaskPayload::Progress { .. }, TaskKind::ProgressTracker)
                | (TaskPayload::Support { .. }, TaskKind::SupportAdvisor)
                | (TaskPayload::Risk { .. }, TaskKind::RiskResponder)
        )
    }

    /// 可以直接作为回复正文的文本
    pub fn reply(&self) -> Option<&str> {
        match self {
            TaskPayload::CheckIn { reply } | TaskPayload::Support { reply, .. } => Some(reply),
            TaskPayload::Risk { safety_message, .. } => Some(safety_message),
            _ => None,
        }
    }
}

/// 任务体的输出：`{ payload, confidence, reasoning, insights[] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    pub payload: TaskPayload,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub insights: Vec<String>,
}

/// 任务体的输入包
#[derive(Debug, Clone, Serialize)]
pub struct TaskInput {
    pub kind: TaskKind,
    pub message: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub risk: RiskSummary,
    /// 依赖链上已完成的前置结果
    pub prerequisites: BTreeMap<TaskKind, TaskPayload>,
    /// 预测层命中的非权威提示
    pub hint: Option<TaskPayload>,
}

/// 统一的任务边界：`runTask(taskId, inputBundle)`
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn run(&self, input: &TaskInput) -> Result<TaskOutput, TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tag_matches_kind() {
        let payload: TaskPayload = serde_json::from_value(serde_json::json!({
            "kind": "emotion",
            "primary_emotion": "anxiety",
            "intensity": 0.6,
            "valence": -0.4
        }))
        .unwrap();
        assert!(payload.matches(TaskKind::EmotionAnalyzer));
        assert!(!payload.matches(TaskKind::SupportAdvisor));
        assert_eq!(payload.reply(), None);
        for kind in TaskKind::all() {
            assert!(!TaskPayload::tag_for(kind).is_empty());
        }
    }

    #[test]
    fn test_reply_bearing_payloads() {
        let support = TaskPayload::Support {
            reply: "one step at a time".into(),
            techniques: vec![],
        };
        assert_eq!(support.reply(), Some("one step at a time"));
    }
}
