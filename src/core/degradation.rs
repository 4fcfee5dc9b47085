//! 降级阶梯
//!
//! 在每个任务组之前，根据 SLA 预测逐级降级：
//! 1. 建议快速路径时：丢弃尚未完成的可选/可丢弃任务
//! 2. 预计仍放不下时：把剩余任务折叠为一个尽力而为的任务（优先级权重最高者）
//! 3. 已用掉 90% 时限：放弃剩余任务，返回固定兜底回复
//!
//! 每一步最多应用一次；危机计划不经过阶梯。

use std::collections::BTreeSet;

use serde::Serialize;

use crate::sla::{SlaAction, SlaPrediction};
use crate::workflow::{ExecutionPlan, PlanError, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderStep {
    DropOptional,
    Collapse,
    Abandon,
}

/// 一次降级决定
#[derive(Debug, Clone)]
pub struct Degradation {
    pub step: LadderStep,
    /// 被移除的任务
    pub removed: Vec<TaskKind>,
    /// 降级后的计划；Abandon 时为 None
    pub plan: Option<ExecutionPlan>,
}

#[derive(Debug, Default)]
pub struct DegradationLadder {
    applied: Vec<LadderStep>,
}

impl DegradationLadder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> &[LadderStep] {
        &self.applied
    }

    /// 返回 None 表示保持当前计划
    pub fn decide(
        &mut self,
        plan: &ExecutionPlan,
        completed: &BTreeSet<TaskKind>,
        prediction: &SlaPrediction,
    ) -> Result<Option<Degradation>, PlanError> {
        let pending: Vec<TaskKind> = plan
            .tasks
            .iter()
            .copied()
            .filter(|t| !completed.contains(t))
            .collect();
        if pending.is_empty() {
            return Ok(None);
        }

        if prediction.recommends(SlaAction::ReturnFallback) {
            self.applied.push(LadderStep::Abandon);
            return Ok(Some(Degradation {
                step: LadderStep::Abandon,
                removed: pending,
                plan: None,
            }));
        }

        if !prediction.recommends(SlaAction::EnableFastPath) {
            return Ok(None);
        }

        // 快速路径：本次请求的可选任务一律视为可丢弃，与用户的速度偏好无关
        if !self.applied.contains(&LadderStep::DropOptional) {
            let droppable: BTreeSet<TaskKind> = pending
                .iter()
                .copied()
                .filter(|t| plan.droppable.contains(t) || plan.optional.contains(t))
                .collect();
            // 只有在还能继续执行其他任务时才丢弃
            if !droppable.is_empty() && droppable.len() < pending.len() {
                self.applied.push(LadderStep::DropOptional);
                return Ok(Some(Degradation {
                    step: LadderStep::DropOptional,
                    removed: droppable.iter().copied().collect(),
                    plan: Some(plan.without(&droppable)?),
                }));
            }
        }

        if !prediction.recommends(SlaAction::SkipOptionalTasks) {
            return Ok(None);
        }

        if !self.applied.contains(&LadderStep::Collapse) && pending.len() > 1 {
            let primary = best_effort_task(&pending);
            self.applied.push(LadderStep::Collapse);
            return Ok(Some(Degradation {
                step: LadderStep::Collapse,
                removed: pending.iter().copied().filter(|t| *t != primary).collect(),
                plan: Some(plan.collapse_to(primary, completed)?),
            }));
        }

        Ok(None)
    }
}

/// 优先级权重最高的待执行任务；相同权重取拓扑序靠后者（更接近最终回复）
fn best_effort_task(pending: &[TaskKind]) -> TaskKind {
    let mut best = pending[0];
    for task in &pending[1..] {
        if task.priority_weight() >= best.priority_weight() {
            best = *task;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{PlanBuilder, PlanStrategy, Scenario};

    fn prediction(actions: Vec<SlaAction>) -> SlaPrediction {
        SlaPrediction {
            likely: actions.is_empty(),
            elapsed_ms: 0,
            remaining_ms: 0,
            usable_ms: 0,
            recommended_actions: actions,
        }
    }

    fn supportive(fast: bool) -> ExecutionPlan {
        let builder = PlanBuilder::new(PlanStrategy::ParallelSupport, Scenario::EmotionalSupport)
            .task(TaskKind::EmotionAnalyzer)
            .optional_task(TaskKind::ContextMemory)
            .task(TaskKind::SupportAdvisor)
            .depends_on_all(
                TaskKind::SupportAdvisor,
                vec![TaskKind::EmotionAnalyzer, TaskKind::ContextMemory],
            )
            .deadline_ms(3000);
        let builder = if fast { builder.droppable_optional() } else { builder };
        builder.build().unwrap()
    }

    #[test]
    fn test_no_action_keeps_plan() {
        let mut ladder = DegradationLadder::new();
        let d = ladder
            .decide(&supportive(true), &BTreeSet::new(), &prediction(vec![]))
            .unwrap();
        assert!(d.is_none());
    }

    #[test]
    fn test_ladder_escalates_drop_then_collapse() {
        let mut ladder = DegradationLadder::new();
        let plan = supportive(true);
        let tight = prediction(vec![SlaAction::EnableFastPath, SlaAction::SkipOptionalTasks]);

        let first = ladder.decide(&plan, &BTreeSet::new(), &tight).unwrap().unwrap();
        assert_eq!(first.step, LadderStep::DropOptional);
        assert_eq!(first.removed, vec![TaskKind::ContextMemory]);
        let dropped = first.plan.unwrap();
        assert!(!dropped.contains(TaskKind::ContextMemory));

        let second = ladder.decide(&dropped, &BTreeSet::new(), &tight).unwrap().unwrap();
        assert_eq!(second.step, LadderStep::Collapse);
        let collapsed = second.plan.unwrap();
        assert_eq!(collapsed.tasks, vec![TaskKind::SupportAdvisor]);

        // 两步都用过后不再降级
        assert!(ladder.decide(&collapsed, &BTreeSet::new(), &tight).unwrap().is_none());
    }

    #[test]
    fn test_fast_path_drops_optional_of_balanced_plan() {
        let mut ladder = DegradationLadder::new();
        let plan = supportive(false);
        assert!(plan.droppable.is_empty());

        let d = ladder
            .decide(&plan, &BTreeSet::new(), &prediction(vec![SlaAction::EnableFastPath]))
            .unwrap()
            .unwrap();
        assert_eq!(d.step, LadderStep::DropOptional);
        assert_eq!(d.removed, vec![TaskKind::ContextMemory]);

        // 只建议快速路径时不会继续折叠
        let dropped = d.plan.unwrap();
        assert!(ladder
            .decide(&dropped, &BTreeSet::new(), &prediction(vec![SlaAction::EnableFastPath]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_without_optional_goes_straight_to_collapse() {
        let mut ladder = DegradationLadder::new();
        let plan = PlanBuilder::new(PlanStrategy::ParallelSupport, Scenario::EmotionalSupport)
            .task(TaskKind::EmotionAnalyzer)
            .task(TaskKind::SupportAdvisor)
            .sequential(TaskKind::EmotionAnalyzer, TaskKind::SupportAdvisor)
            .deadline_ms(3000)
            .build()
            .unwrap();
        let tight = prediction(vec![SlaAction::EnableFastPath, SlaAction::SkipOptionalTasks]);
        let d = ladder.decide(&plan, &BTreeSet::new(), &tight).unwrap().unwrap();
        assert_eq!(d.step, LadderStep::Collapse);
        assert_eq!(d.removed, vec![TaskKind::EmotionAnalyzer]);
    }

    #[test]
    fn test_collapse_keeps_completed_results() {
        let mut ladder = DegradationLadder::new();
        let completed = BTreeSet::from([TaskKind::EmotionAnalyzer, TaskKind::ContextMemory]);
        let tight = prediction(vec![SlaAction::SkipOptionalTasks]);
        // 只剩一个任务，无可折叠
        assert!(ladder.decide(&supportive(false), &completed, &tight).unwrap().is_none());
    }

    #[test]
    fn test_fallback_abandons_everything_pending() {
        let mut ladder = DegradationLadder::new();
        let late = prediction(vec![
            SlaAction::EnableFastPath,
            SlaAction::SkipOptionalTasks,
            SlaAction::ReturnFallback,
        ]);
        let completed = BTreeSet::from([TaskKind::EmotionAnalyzer]);
        let d = ladder.decide(&supportive(false), &completed, &late).unwrap().unwrap();
        assert_eq!(d.step, LadderStep::Abandon);
        assert_eq!(d.removed, vec![TaskKind::ContextMemory, TaskKind::SupportAdvisor]);
        assert!(d.plan.is_none());
    }
}
