//! SLA 监控：每个请求的计时账本、截止时间预测、滚动窗口合规统计

pub mod monitor;
pub mod stats;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::workflow::{Scenario, TaskKind};

pub use monitor::SlaMonitor;
pub use stats::{ComplianceStats, ScenarioStats, SlowTask};

/// 建议动作（固定词表，随剩余预算减少逐级升级）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaAction {
    EnableFastPath,
    SkipOptionalTasks,
    ReturnFallback,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaPrediction {
    /// 预计能在时限内完成
    pub likely: bool,
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
    /// 扣除安全缓冲后的可用预算
    pub usable_ms: u64,
    pub recommended_actions: Vec<SlaAction>,
}

impl SlaPrediction {
    pub fn recommends(&self, action: SlaAction) -> bool {
        self.recommended_actions.contains(&action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTiming {
    pub task: TaskKind,
    pub start_offset_ms: u64,
    pub duration_ms: u64,
    pub success: bool,
}

/// 一个已完成请求的 SLA 记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaRecord {
    pub request_id: String,
    pub scenario: Scenario,
    pub target_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tasks: Vec<TaskTiming>,
    pub compliant: bool,
}
