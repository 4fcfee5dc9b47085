//! 执行计划构建器
//!
//! 提供流畅的 API 来构建计划；build() 校验依赖并按拓扑层次计算并发组

use std::collections::{BTreeMap, BTreeSet};

use crate::risk::RiskScore;
use crate::workflow::graph::PlanGraph;
use crate::workflow::types::*;

/// 执行计划构建器
pub struct PlanBuilder {
    strategy: PlanStrategy,
    scenario: Scenario,
    complexity: Option<Complexity>,
    tasks: Vec<TaskKind>,
    dependencies: BTreeMap<TaskKind, Vec<TaskKind>>,
    optional: BTreeSet<TaskKind>,
    droppable: BTreeSet<TaskKind>,
    deadline_ms: u64,
    risk: Option<RiskScore>,
}

impl PlanBuilder {
    pub fn new(strategy: PlanStrategy, scenario: Scenario) -> Self {
        Self {
            strategy,
            scenario,
            complexity: None,
            tasks: Vec::new(),
            dependencies: BTreeMap::new(),
            optional: BTreeSet::new(),
            droppable: BTreeSet::new(),
            deadline_ms: 0,
            risk: None,
        }
    }

    /// 添加任务
    pub fn task(mut self, task: TaskKind) -> Self {
        if !self.tasks.contains(&task) {
            self.tasks.push(task);
        }
        self
    }

    /// 添加可选任务（fast 偏好下可被丢弃）
    pub fn optional_task(mut self, task: TaskKind) -> Self {
        self.optional.insert(task);
        self.task(task)
    }

    /// 设置顺序依赖
    pub fn sequential(mut self, from: TaskKind, to: TaskKind) -> Self {
        let deps = self.dependencies.entry(to).or_default();
        if !deps.contains(&from) {
            deps.push(from);
        }
        self
    }

    /// 设置 AND 依赖（所有前置任务）
    pub fn depends_on_all(mut self, task: TaskKind, deps: Vec<TaskKind>) -> Self {
        for dep in deps {
            self = self.sequential(dep, task);
        }
        self
    }

    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = Some(complexity);
        self
    }

    pub fn deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = deadline_ms;
        self
    }

    /// 将所有可选任务标记为可丢弃
    pub fn droppable_optional(mut self) -> Self {
        self.droppable = self.optional.clone();
        self
    }

    pub fn risk(mut self, risk: RiskScore) -> Self {
        self.risk = Some(risk);
        self
    }

    /// 构建计划：校验依赖、检测环、计算并发组
    pub fn build(self) -> Result<ExecutionPlan, PlanError> {
        if self.deadline_ms == 0 {
            return Err(PlanError::InvalidConfiguration(
                "deadline must be positive".to_string(),
            ));
        }

        let graph = PlanGraph::new(&self.tasks, &self.dependencies)?;
        let groups = graph.layers()?;
        let tasks: Vec<TaskKind> = groups.iter().flatten().copied().collect();
        let dependencies = tasks
            .iter()
            .map(|t| (*t, self.dependencies.get(t).cloned().unwrap_or_default()))
            .collect();

        let plan = ExecutionPlan {
            id: format!("plan_{}", uuid::Uuid::new_v4()),
            tasks,
            dependencies,
            groups,
            strategy: self.strategy,
            scenario: self.scenario,
            complexity: self.complexity,
            deadline_ms: self.deadline_ms,
            optional: self.optional,
            droppable: self.droppable,
            risk: self.risk.unwrap_or_else(RiskScore::conservative),
        };
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_supportive_shape() {
        let plan = PlanBuilder::new(PlanStrategy::ParallelSupport, Scenario::EmotionalSupport)
            .task(TaskKind::EmotionAnalyzer)
            .optional_task(TaskKind::ContextMemory)
            .task(TaskKind::SupportAdvisor)
            .depends_on_all(
                TaskKind::SupportAdvisor,
                vec![TaskKind::EmotionAnalyzer, TaskKind::ContextMemory],
            )
            .deadline_ms(3000)
            .build()
            .unwrap();

        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].len(), 2);
        assert_eq!(plan.groups[1], vec![TaskKind::SupportAdvisor]);
        assert!(plan.droppable.is_empty());
        assert!(plan.optional.contains(&TaskKind::ContextMemory));
    }

    #[test]
    fn test_droppable_optional() {
        let plan = PlanBuilder::new(PlanStrategy::ParallelSupport, Scenario::EmotionalSupport)
            .task(TaskKind::EmotionAnalyzer)
            .optional_task(TaskKind::ContextMemory)
            .droppable_optional()
            .deadline_ms(3000)
            .build()
            .unwrap();
        assert_eq!(plan.droppable, BTreeSet::from([TaskKind::ContextMemory]));
    }

    #[test]
    fn test_zero_deadline_rejected() {
        let result = PlanBuilder::new(PlanStrategy::SingleAgent, Scenario::CheckIn)
            .task(TaskKind::CheckInResponder)
            .build();
        assert!(matches!(result, Err(PlanError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = PlanBuilder::new(PlanStrategy::SingleAgent, Scenario::CheckIn)
            .task(TaskKind::SupportAdvisor)
            .sequential(TaskKind::ContextMemory, TaskKind::SupportAdvisor)
            .deadline_ms(1500)
            .build();
        assert!(matches!(result, Err(PlanError::UnknownPrerequisite { .. })));
    }
}
