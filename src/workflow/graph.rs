//! 计划依赖图
//!
//! 使用邻接表和入度表实现 DAG 拓扑分层：每一层内的任务可以并发执行

use std::collections::{BTreeMap, BTreeSet};

use crate::workflow::types::*;

/// 计划依赖图
pub struct PlanGraph {
    /// 任务插入顺序（分层时层内保持该顺序）
    order: Vec<TaskKind>,
    /// 邻接表：任务 -> 依赖该任务的任务列表
    pub adjacency: BTreeMap<TaskKind, Vec<TaskKind>>,
    /// 入度表：任务 -> 未完成的依赖数
    pub in_degree: BTreeMap<TaskKind, usize>,
}

impl PlanGraph {
    /// 创建依赖图；引用了计划外任务的依赖视为配置错误
    pub fn new(
        tasks: &[TaskKind],
        dependencies: &BTreeMap<TaskKind, Vec<TaskKind>>,
    ) -> Result<Self, PlanError> {
        if tasks.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let mut order: Vec<TaskKind> = Vec::new();
        let mut adjacency: BTreeMap<TaskKind, Vec<TaskKind>> = BTreeMap::new();
        let mut in_degree: BTreeMap<TaskKind, usize> = BTreeMap::new();

        for task in tasks {
            if !order.contains(task) {
                order.push(*task);
            }
            in_degree.insert(*task, 0);
            adjacency.insert(*task, Vec::new());
        }

        for (task, deps) in dependencies {
            if !in_degree.contains_key(task) {
                continue;
            }
            let unique: BTreeSet<TaskKind> = deps.iter().copied().collect();
            for dep in unique {
                if !adjacency.contains_key(&dep) {
                    return Err(PlanError::UnknownPrerequisite {
                        task: *task,
                        prerequisite: dep,
                    });
                }
                adjacency.entry(dep).or_default().push(*task);
                *in_degree.entry(*task).or_insert(0) += 1;
            }
        }

        Ok(Self {
            order,
            adjacency,
            in_degree,
        })
    }

    /// 获取可执行的任务（入度为 0 且未完成）
    pub fn get_ready_tasks(&self, completed: &BTreeSet<TaskKind>) -> Vec<TaskKind> {
        self.order
            .iter()
            .copied()
            .filter(|task| {
                !completed.contains(task)
                    && self
                        .adjacency
                        .iter()
                        .filter(|(_, dependents)| dependents.contains(task))
                        .all(|(dep, _)| completed.contains(dep))
            })
            .collect()
    }

    /// Kahn 算法按层输出；存在环时返回 CyclicDependency
    pub fn layers(&self) -> Result<Vec<Vec<TaskKind>>, PlanError> {
        let mut in_degree = self.in_degree.clone();
        let mut layers: Vec<Vec<TaskKind>> = Vec::new();
        let mut visited = 0usize;

        let mut current: Vec<TaskKind> = self
            .order
            .iter()
            .copied()
            .filter(|t| in_degree.get(t) == Some(&0))
            .collect();

        while !current.is_empty() {
            visited += current.len();
            let mut next: BTreeSet<TaskKind> = BTreeSet::new();
            for task in &current {
                if let Some(dependents) = self.adjacency.get(task) {
                    for dependent in dependents {
                        if let Some(degree) = in_degree.get_mut(dependent) {
                            *degree -= 1;
                            if *degree == 0 {
                                next.insert(*dependent);
                            }
                        }
                    }
                }
            }
            layers.push(current);
            current = self
                .order
                .iter()
                .copied()
                .filter(|t| next.contains(t))
                .collect();
        }

        if visited != self.order.len() {
            return Err(PlanError::CyclicDependency);
        }
        Ok(layers)
    }

    pub fn is_acyclic(&self) -> bool {
        self.layers().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(TaskKind, &[TaskKind])]) -> BTreeMap<TaskKind, Vec<TaskKind>> {
        pairs.iter().map(|(t, d)| (*t, d.to_vec())).collect()
    }

    #[test]
    fn test_graph_construction_sequential() {
        let tasks = [TaskKind::RiskResponder, TaskKind::SupportAdvisor];
        let graph = PlanGraph::new(
            &tasks,
            &deps(&[(TaskKind::SupportAdvisor, &[TaskKind::RiskResponder])]),
        )
        .unwrap();

        assert_eq!(graph.in_degree.get(&TaskKind::RiskResponder), Some(&0));
        assert_eq!(graph.in_degree.get(&TaskKind::SupportAdvisor), Some(&1));
    }

    #[test]
    fn test_get_ready_tasks() {
        let tasks = [TaskKind::RiskResponder, TaskKind::SupportAdvisor];
        let graph = PlanGraph::new(
            &tasks,
            &deps(&[(TaskKind::SupportAdvisor, &[TaskKind::RiskResponder])]),
        )
        .unwrap();

        let ready = graph.get_ready_tasks(&BTreeSet::new());
        assert_eq!(ready, vec![TaskKind::RiskResponder]);

        let ready = graph.get_ready_tasks(&BTreeSet::from([TaskKind::RiskResponder]));
        assert_eq!(ready, vec![TaskKind::SupportAdvisor]);
    }

    #[test]
    fn test_layers_group_parallel_tasks() {
        let tasks = [
            TaskKind::EmotionAnalyzer,
            TaskKind::ContextMemory,
            TaskKind::SupportAdvisor,
        ];
        let graph = PlanGraph::new(
            &tasks,
            &deps(&[(
                TaskKind::SupportAdvisor,
                &[TaskKind::EmotionAnalyzer, TaskKind::ContextMemory],
            )]),
        )
        .unwrap();

        let layers = graph.layers().unwrap();
        assert_eq!(
            layers,
            vec![
                vec![TaskKind::EmotionAnalyzer, TaskKind::ContextMemory],
                vec![TaskKind::SupportAdvisor],
            ]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let tasks = [TaskKind::EmotionAnalyzer, TaskKind::ContextMemory];
        let graph = PlanGraph::new(
            &tasks,
            &deps(&[
                (TaskKind::EmotionAnalyzer, &[TaskKind::ContextMemory]),
                (TaskKind::ContextMemory, &[TaskKind::EmotionAnalyzer]),
            ]),
        )
        .unwrap();

        assert_eq!(graph.layers(), Err(PlanError::CyclicDependency));
        assert!(!graph.is_acyclic());
    }

    #[test]
    fn test_unknown_prerequisite_rejected() {
        let tasks = [TaskKind::SupportAdvisor];
        let result = PlanGraph::new(
            &tasks,
            &deps(&[(TaskKind::SupportAdvisor, &[TaskKind::ContextMemory])]),
        );
        assert!(matches!(result, Err(PlanError::UnknownPrerequisite { .. })));
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(matches!(
            PlanGraph::new(&[], &BTreeMap::new()),
            Err(PlanError::EmptyPlan)
        ));
    }
}
