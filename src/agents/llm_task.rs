//! LLM 驱动的任务体
//!
//! 拼 system prompt + user prompt 调用 LlmClient；从回复中提取 JSON，
//! 注入 payload 的 kind 标签后解析为对应任务种类的 TaskPayload。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agents::prompts::{system_prompt, user_prompt};
use crate::agents::{TaskBody, TaskInput, TaskOutput, TaskPayload};
use crate::core::TaskError;
use crate::llm::{LlmClient, LlmError, Message};
use crate::workflow::TaskKind;

pub struct LlmTaskBody {
    llm: Arc<dyn LlmClient>,
    request_timeout: Duration,
}

impl LlmTaskBody {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

#[async_trait]
impl TaskBody for LlmTaskBody {
    async fn run(&self, input: &TaskInput) -> Result<TaskOutput, TaskError> {
        let messages = vec![
            Message::system(system_prompt(input.kind)),
            Message::user(user_prompt(input)),
        ];

        let raw = tokio::time::timeout(self.request_timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| LlmError::Request("request timed out".to_string()))??;

        parse_task_output(input.kind, &raw)
    }
}

/// 提取 JSON 块（```json ... ``` 或首尾花括号之间）
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析 LLM 输出为 TaskOutput；payload 缺少 kind 标签时按任务种类补上
pub fn parse_task_output(kind: TaskKind, output: &str) -> Result<TaskOutput, TaskError> {
    let json_str = extract_json(output).ok_or_else(|| TaskError::malformed(kind, "no JSON object"))?;
    let mut value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| TaskError::malformed(kind, e.to_string()))?;

    let payload = value
        .get_mut("payload")
        .and_then(|p| p.as_object_mut())
        .ok_or_else(|| TaskError::malformed(kind, "missing payload object"))?;
    payload
        .entry("kind")
        .or_insert_with(|| serde_json::Value::String(TaskPayload::tag_for(kind).to_string()));

    let mut output: TaskOutput =
        serde_json::from_value(value).map_err(|e| TaskError::malformed(kind, e.to_string()))?;
    if !output.payload.matches(kind) {
        return Err(TaskError::malformed(kind, "payload kind does not match task"));
    }
    if !output.confidence.is_finite() {
        return Err(TaskError::malformed(kind, "confidence is not a number"));
    }
    output.confidence = output.confidence.clamp(0.0, 1.0);
    Ok(output)
}
