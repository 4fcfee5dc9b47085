//! 任务错误类型与运行时故障分类
//!
//! 单个任务的故障只会变成一条失败的 TaskResult + 警告标记，永远不会抛给调用方。

use thiserror::Error;

use crate::llm::LlmError;
use crate::workflow::TaskKind;

/// 任务体执行过程中可能出现的错误（LLM 失败、输出格式错误、超时等）
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Malformed output from {task}: {reason}")]
    MalformedOutput { task: TaskKind, reason: String },

    #[error("Task timeout: {0}")]
    Timeout(TaskKind),

    #[error("Task join failed: {0}")]
    Join(String),

    #[error("Task failed: {0}")]
    Failed(String),
}

impl TaskError {
    pub fn malformed(task: TaskKind, reason: impl Into<String>) -> Self {
        TaskError::MalformedOutput {
            task,
            reason: reason.into(),
        }
    }

    /// 审计日志中的 outcome 字段
    pub fn outcome(&self) -> &'static str {
        match self {
            TaskError::Timeout(_) => "timeout",
            _ => "error",
        }
    }
}
