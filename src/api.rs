//! 对外数据：入站请求、出站响应与编排轨迹（JSON 字段为 camelCase）

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::core::ExecutionStep;
use crate::risk::{CulturalContext, RiskSummary};
use crate::workflow::{PlanStrategy, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyHint {
    #[default]
    Normal,
    Elevated,
    Crisis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreference {
    Fast,
    #[default]
    Balanced,
    Thorough,
}

/// 调用方希望看到的编排细节
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transparency {
    #[default]
    Minimal,
    Standard,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub speed: SpeedPreference,
    pub transparency: Transparency,
}

/// 入站 JSON
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRequest {
    pub message: String,
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub urgency_hint: UrgencyHint,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub cultural_context: Option<CulturalContext>,
}

/// 已接受的请求：创建后不可变
#[derive(Debug, Clone)]
pub struct Request {
    id: Uuid,
    accepted_at: Instant,
    message: String,
    user_id: String,
    conversation_id: Option<String>,
    urgency_hint: UrgencyHint,
    preferences: Preferences,
    cultural_context: Option<CulturalContext>,
}

impl Request {
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            accepted_at: Instant::now(),
            message: message.into(),
            user_id: user_id.into(),
            conversation_id: None,
            urgency_hint: UrgencyHint::Normal,
            preferences: Preferences::default(),
            cultural_context: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_urgency(mut self, urgency_hint: UrgencyHint) -> Self {
        self.urgency_hint = urgency_hint;
        self
    }

    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_cultural_context(mut self, cultural_context: CulturalContext) -> Self {
        self.cultural_context = Some(cultural_context);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 计时起点（SLA 与任务偏移都相对该时刻）
    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn urgency_hint(&self) -> UrgencyHint {
        self.urgency_hint
    }

    pub fn preferences(&self) -> Preferences {
        self.preferences
    }

    pub fn cultural_context(&self) -> Option<&CulturalContext> {
        self.cultural_context.as_ref()
    }
}

impl From<InboundRequest> for Request {
    fn from(inbound: InboundRequest) -> Self {
        let mut request = Request::new(inbound.message, inbound.user_id)
            .with_urgency(inbound.urgency_hint)
            .with_preferences(inbound.preferences);
        request.conversation_id = inbound.conversation_id;
        request.cultural_context = inbound.cultural_context;
        request
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub planning_ms: u64,
    pub scheduling_overhead_ms: u64,
    pub parallel_ms: u64,
    pub synthesis_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfidenceSummary {
    pub overall: f32,
    pub agreement: f32,
}

/// 编排轨迹：仅在调用方要求透明度时出现
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationTrace {
    pub strategy: PlanStrategy,
    pub execution_pattern: String,
    pub task_results: Vec<TaskResult>,
    pub timing: Timing,
    pub confidence: ConfidenceSummary,
    /// transparency = detailed 时附带完整事件日志
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<ExecutionStep>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub response_confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<RiskSummary>,
    pub warning_flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub content: String,
    pub message_id: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<OrchestrationTrace>,
    pub metadata: ResponseMetadata,
}

impl Response {
    pub fn has_warning(&self, flag: &str) -> bool {
        self.metadata.warning_flags.iter().any(|f| f == flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_defaults() {
        let inbound: InboundRequest =
            serde_json::from_str(r#"{"message": "hi", "userId": "u1"}"#).unwrap();
        let request = Request::from(inbound);
        assert_eq!(request.urgency_hint(), UrgencyHint::Normal);
        assert_eq!(request.preferences().transparency, Transparency::Minimal);
        assert_eq!(request.preferences().speed, SpeedPreference::Balanced);
        assert!(request.conversation_id().is_none());
    }

    #[test]
    fn test_inbound_full() {
        let inbound: InboundRequest = serde_json::from_str(
            r#"{"message": "hi", "userId": "u1", "conversationId": "c1",
                "urgencyHint": "crisis",
                "preferences": {"speed": "fast", "transparency": "detailed"}}"#,
        )
        .unwrap();
        let request = Request::from(inbound);
        assert_eq!(request.urgency_hint(), UrgencyHint::Crisis);
        assert_eq!(request.preferences().speed, SpeedPreference::Fast);
        assert_eq!(request.conversation_id(), Some("c1"));
    }

    #[test]
    fn test_orchestration_omitted_when_absent() {
        let response = Response {
            content: "ok".into(),
            message_id: "m".into(),
            conversation_id: "c".into(),
            orchestration: None,
            metadata: ResponseMetadata::default(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("orchestration").is_none());
        assert!(value["metadata"].get("riskAssessment").is_none());
        assert!(value["metadata"]["warningFlags"].as_array().unwrap().is_empty());
    }
}
