//! 任务体：统一的 runTask 边界与基于 LLM 的实现

pub mod llm_task;
pub mod prompts;
pub mod types;

pub use llm_task::{parse_task_output, LlmTaskBody};
pub use types::{TaskBody, TaskInput, TaskOutput, TaskPayload};
