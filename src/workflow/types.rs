//! 执行计划类型定义
//!
//! 定义任务种类（封闭枚举）、场景、策略、执行计划与任务结果等核心数据类型

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::TaskPayload;
use crate::cache::CacheTier;
use crate::risk::RiskScore;

/// 任务种类：每种任务的输入输出形状在编译期已知
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// 简单签到的直接回复
    CheckInResponder,
    /// 情绪/情感分析
    EmotionAnalyzer,
    /// 对话记忆与上下文
    ContextMemory,
    /// 目标与进展跟踪
    ProgressTracker,
    /// 支持性建议（需要综合前置结果）
    SupportAdvisor,
    /// 危机响应
    RiskResponder,
}

impl TaskKind {
    pub fn all() -> [TaskKind; 6] {
        [
            TaskKind::CheckInResponder,
            TaskKind::EmotionAnalyzer,
            TaskKind::ContextMemory,
            TaskKind::ProgressTracker,
            TaskKind::SupportAdvisor,
            TaskKind::RiskResponder,
        ]
    }

    /// 稳定的线上名称（日志、缓存键、提示词标记）
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CheckInResponder => "check_in_responder",
            TaskKind::EmotionAnalyzer => "emotion_analyzer",
            TaskKind::ContextMemory => "context_memory",
            TaskKind::ProgressTracker => "progress_tracker",
            TaskKind::SupportAdvisor => "support_advisor",
            TaskKind::RiskResponder => "risk_responder",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|k| k.as_str() == name)
    }

    /// 合成时的优先级权重
    pub fn priority_weight(&self) -> f32 {
        match self {
            TaskKind::RiskResponder => 1.2,
            TaskKind::SupportAdvisor => 1.0,
            TaskKind::CheckInResponder => 1.0,
            TaskKind::ProgressTracker => 0.7,
            TaskKind::EmotionAnalyzer => 0.6,
            TaskKind::ContextMemory => 0.5,
        }
    }

    /// 自适应 TTL 的任务类型系数
    pub fn ttl_multiplier(&self) -> f64 {
        match self {
            TaskKind::ContextMemory => 4.0,
            TaskKind::ProgressTracker => 2.0,
            TaskKind::EmotionAnalyzer => 1.0,
            TaskKind::SupportAdvisor => 1.0,
            TaskKind::CheckInResponder => 0.5,
            TaskKind::RiskResponder => 0.0,
        }
    }

    /// 危机响应永不缓存
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, TaskKind::RiskResponder)
    }

    /// 结果较稳定，值得写入共享层
    pub fn is_stable(&self) -> bool {
        matches!(self, TaskKind::ContextMemory | TaskKind::ProgressTracker)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 场景（对应不同 SLA 档位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    CheckIn,
    EmotionalSupport,
    DeepSupport,
    Crisis,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::CheckIn => "check_in",
            Scenario::EmotionalSupport => "emotional_support",
            Scenario::DeepSupport => "deep_support",
            Scenario::Crisis => "crisis",
        }
    }
}

/// 消息复杂度分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Supportive,
    Deep,
}

impl Complexity {
    pub fn scenario(&self) -> Scenario {
        match self {
            Complexity::Simple => Scenario::CheckIn,
            Complexity::Supportive => Scenario::EmotionalSupport,
            Complexity::Deep => Scenario::DeepSupport,
        }
    }
}

/// 计划策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    SingleAgent,
    ParallelSupport,
    DeepAnalysis,
    CrisisPriority,
}

impl PlanStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStrategy::SingleAgent => "single_agent",
            PlanStrategy::ParallelSupport => "parallel_support",
            PlanStrategy::DeepAnalysis => "deep_analysis",
            PlanStrategy::CrisisPriority => "crisis_priority",
        }
    }
}

/// 执行计划：由 Planner 一次性创建，之后只读；降级时派生新计划而不修改原计划
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    /// 拓扑序的任务列表
    pub tasks: Vec<TaskKind>,
    /// 任务 -> 前置任务
    pub dependencies: BTreeMap<TaskKind, Vec<TaskKind>>,
    /// 可并发执行的任务组（按拓扑层次排列）
    pub groups: Vec<Vec<TaskKind>>,
    pub strategy: PlanStrategy,
    pub scenario: Scenario,
    pub complexity: Option<Complexity>,
    pub deadline_ms: u64,
    /// 模板中标记为可选的任务
    pub optional: BTreeSet<TaskKind>,
    /// 降级阶梯第一步可丢弃的任务
    pub droppable: BTreeSet<TaskKind>,
    /// 决定本计划的风险评估
    #[serde(skip)]
    pub risk: RiskScore,
}

impl ExecutionPlan {
    pub fn prerequisites(&self, task: TaskKind) -> &[TaskKind] {
        self.dependencies
            .get(&task)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, task: TaskKind) -> bool {
        self.tasks.contains(&task)
    }

    /// sequential / parallel / hybrid
    pub fn execution_pattern(&self) -> &'static str {
        if self.groups.len() <= 1 {
            if self.tasks.len() <= 1 {
                "sequential"
            } else {
                "parallel"
            }
        } else if self.groups.iter().all(|g| g.len() == 1) {
            "sequential"
        } else {
            "hybrid"
        }
    }

    /// 移除指定任务（同时从依赖表中抹去），重新分组
    pub fn without(&self, removed: &BTreeSet<TaskKind>) -> Result<ExecutionPlan, PlanError> {
        let tasks: Vec<TaskKind> = self
            .tasks
            .iter()
            .copied()
            .filter(|t| !removed.contains(t))
            .collect();
        let dependencies = tasks
            .iter()
            .map(|t| {
                let deps: Vec<TaskKind> = self
                    .prerequisites(*t)
                    .iter()
                    .copied()
                    .filter(|d| !removed.contains(d))
                    .collect();
                (*t, deps)
            })
            .collect();
        self.derive(tasks, dependencies)
    }

    /// 折叠为「已完成任务 + 一个尽力而为的任务」
    pub fn collapse_to(
        &self,
        primary: TaskKind,
        completed: &BTreeSet<TaskKind>,
    ) -> Result<ExecutionPlan, PlanError> {
        let removed: BTreeSet<TaskKind> = self
            .tasks
            .iter()
            .copied()
            .filter(|t| *t != primary && !completed.contains(t))
            .collect();
        self.without(&removed)
    }

    fn derive(
        &self,
        tasks: Vec<TaskKind>,
        dependencies: BTreeMap<TaskKind, Vec<TaskKind>>,
    ) -> Result<ExecutionPlan, PlanError> {
        let groups = crate::workflow::PlanGraph::new(&tasks, &dependencies)?.layers()?;
        let tasks: Vec<TaskKind> = groups.iter().flatten().copied().collect();
        let keep = |set: &BTreeSet<TaskKind>| -> BTreeSet<TaskKind> {
            set.iter().copied().filter(|t| tasks.contains(t)).collect()
        };
        Ok(ExecutionPlan {
            id: self.id.clone(),
            optional: keep(&self.optional),
            droppable: keep(&self.droppable),
            tasks,
            dependencies,
            groups,
            strategy: self.strategy,
            scenario: self.scenario,
            complexity: self.complexity,
            deadline_ms: self.deadline_ms,
            risk: self.risk.clone(),
        })
    }

    /// 校验：依赖无环，且每个组内任务的前置任务都在更早的组中
    pub fn validate(&self) -> Result<(), PlanError> {
        crate::workflow::PlanGraph::new(&self.tasks, &self.dependencies)?.layers()?;
        let mut seen: BTreeSet<TaskKind> = BTreeSet::new();
        for group in &self.groups {
            for task in group {
                for dep in self.prerequisites(*task) {
                    if !seen.contains(dep) {
                        return Err(PlanError::InvalidConfiguration(format!(
                            "{} is grouped before its prerequisite {}",
                            task, dep
                        )));
                    }
                }
            }
            seen.extend(group.iter().copied());
        }
        Ok(())
    }
}

/// 任务结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ResultSource {
    Live,
    Cache { tier: CacheTier },
}

/// 单个任务的结果：创建后不可变，只追加到结果列表
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task: TaskKind,
    /// 相对请求开始的偏移（毫秒）
    pub start_offset_ms: u64,
    pub end_offset_ms: u64,
    /// 对调度器不透明
    pub payload: Option<TaskPayload>,
    pub confidence: f32,
    pub success: bool,
    /// 合成器使用的影响力权重
    pub influence_weight: f32,
    pub source: ResultSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,
}

impl TaskResult {
    pub fn duration_ms(&self) -> u64 {
        self.end_offset_ms.saturating_sub(self.start_offset_ms)
    }
}

/// 计划错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Cyclic dependency detected")]
    CyclicDependency,
    #[error("Unknown prerequisite {prerequisite} for task {task}")]
    UnknownPrerequisite {
        task: TaskKind,
        prerequisite: TaskKind,
    },
    #[error("Plan has no tasks")]
    EmptyPlan,
    #[error("Invalid plan configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::PlanBuilder;

    fn deep_plan() -> ExecutionPlan {
        PlanBuilder::new(PlanStrategy::DeepAnalysis, Scenario::DeepSupport)
            .task(TaskKind::ContextMemory)
            .task(TaskKind::EmotionAnalyzer)
            .optional_task(TaskKind::ProgressTracker)
            .task(TaskKind::SupportAdvisor)
            .sequential(TaskKind::ContextMemory, TaskKind::SupportAdvisor)
            .deadline_ms(8000)
            .build()
            .unwrap()
    }

    #[test]
    fn test_task_kind_names_round_trip() {
        for kind in TaskKind::all() {
            assert_eq!(TaskKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::from_name("emotion-analyzer"), None);
    }

    #[test]
    fn test_risk_responder_never_cacheable() {
        assert!(!TaskKind::RiskResponder.is_cacheable());
        assert_eq!(TaskKind::RiskResponder.ttl_multiplier(), 0.0);
    }

    #[test]
    fn test_without_removes_edges() {
        let plan = deep_plan();
        let reduced = plan
            .without(&BTreeSet::from([TaskKind::ContextMemory]))
            .unwrap();
        assert!(!reduced.contains(TaskKind::ContextMemory));
        assert!(reduced.prerequisites(TaskKind::SupportAdvisor).is_empty());
        assert_eq!(reduced.groups.len(), 1);
        reduced.validate().unwrap();
    }

    #[test]
    fn test_collapse_keeps_completed_and_primary() {
        let plan = deep_plan();
        let completed = BTreeSet::from([TaskKind::ContextMemory]);
        let collapsed = plan.collapse_to(TaskKind::SupportAdvisor, &completed).unwrap();
        assert_eq!(collapsed.tasks, vec![TaskKind::ContextMemory, TaskKind::SupportAdvisor]);
        assert_eq!(
            collapsed.prerequisites(TaskKind::SupportAdvisor),
            &[TaskKind::ContextMemory]
        );
    }

    #[test]
    fn test_execution_pattern() {
        assert_eq!(deep_plan().execution_pattern(), "hybrid");
    }
}
