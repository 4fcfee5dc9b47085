//! 执行事件日志与警告标记
//!
//! 调度过程不修改计划，只向 StepLog 追加 ExecutionStep；最终结果是日志 + 不可变的结果列表。

use std::fmt;

use serde::Serialize;
use tokio::time::Instant;

use crate::cache::CacheTier;
use crate::core::degradation::LadderStep;
use crate::workflow::{PlanStrategy, TaskKind};

/// 执行过程中的一个事件；at_ms 为相对请求开始的偏移
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ExecutionStep {
    PlanAccepted {
        plan_id: String,
        strategy: PlanStrategy,
        deadline_ms: u64,
        tasks: Vec<TaskKind>,
        at_ms: u64,
    },
    GroupStarted {
        index: usize,
        tasks: Vec<TaskKind>,
        sub_timeout_ms: u64,
        at_ms: u64,
    },
    CacheHit {
        task: TaskKind,
        tier: CacheTier,
        at_ms: u64,
    },
    TaskCompleted {
        task: TaskKind,
        duration_ms: u64,
        confidence: f32,
        at_ms: u64,
    },
    TaskFailed {
        task: TaskKind,
        error: String,
        at_ms: u64,
    },
    TaskTimedOut {
        task: TaskKind,
        timeout_ms: u64,
        at_ms: u64,
    },
    Degraded {
        step: LadderStep,
        removed: Vec<TaskKind>,
        at_ms: u64,
    },
    Abandoned {
        tasks: Vec<TaskKind>,
        at_ms: u64,
    },
    FallbackEmitted {
        reason: String,
        at_ms: u64,
    },
    CrisisReplyEmitted {
        background_tasks: Vec<TaskKind>,
        at_ms: u64,
    },
    Synthesized {
        primary: Option<TaskKind>,
        confidence: f32,
        at_ms: u64,
    },
}

/// 只追加的事件日志
#[derive(Debug, Clone)]
pub struct StepLog {
    origin: Instant,
    steps: Vec<ExecutionStep>,
}

impl StepLog {
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            steps: Vec::new(),
        }
    }

    /// 相对请求开始的毫秒数
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn push(&mut self, step: ExecutionStep) {
        tracing::debug!(step = ?step, "execution step");
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ExecutionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<ExecutionStep> {
        self.steps
    }
}

/// 响应元数据中的非致命警告
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningFlag {
    TaskFailed(TaskKind),
    TaskTimeout(TaskKind),
    SystemError,
    FallbackResponse,
    CrisisProtocol,
}

impl fmt::Display for WarningFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningFlag::TaskFailed(task) => write!(f, "task_failed:{}", task),
            WarningFlag::TaskTimeout(task) => write!(f, "task_timeout:{}", task),
            WarningFlag::SystemError => f.write_str("system_error"),
            WarningFlag::FallbackResponse => f.write_str("fallback_response"),
            WarningFlag::CrisisProtocol => f.write_str("crisis_protocol"),
        }
    }
}

/// 去重且保持首次出现的顺序
pub fn push_flag(flags: &mut Vec<WarningFlag>, flag: WarningFlag) {
    if !flags.contains(&flag) {
        flags.push(flag);
    }
}
