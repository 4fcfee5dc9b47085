//! 合规统计：只从已存储的 SlaRecord 重新计算，没有任何隐藏状态

use std::collections::BTreeMap;

use serde::Serialize;

use crate::sla::SlaRecord;
use crate::workflow::{Scenario, TaskKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStats {
    pub requests: usize,
    pub compliant: usize,
    pub compliance_rate: f64,
    pub avg_ms: f64,
    pub p95_ms: u64,
}

/// 平均耗时占所在请求时限比例过高的任务
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowTask {
    pub task: TaskKind,
    pub samples: usize,
    pub avg_ms: f64,
    pub avg_deadline_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceStats {
    pub total: usize,
    pub compliant: usize,
    pub compliance_rate: f64,
    pub per_scenario: BTreeMap<Scenario, ScenarioStats>,
    pub slow_tasks: Vec<SlowTask>,
}

fn rate(compliant: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        compliant as f64 / total as f64
    }
}

/// 最近秩法；输入须已排序
fn percentile(sorted: &[u64], p: u8) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p as f64 / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

impl ComplianceStats {
    pub fn from_records(records: &[SlaRecord], slow_task_share: f64) -> Self {
        let total = records.len();
        let compliant = records.iter().filter(|r| r.compliant).count();

        let mut by_scenario: BTreeMap<Scenario, Vec<&SlaRecord>> = BTreeMap::new();
        for record in records {
            by_scenario.entry(record.scenario).or_default().push(record);
        }
        let per_scenario = by_scenario
            .into_iter()
            .map(|(scenario, group)| {
                let mut durations: Vec<u64> = group.iter().map(|r| r.duration_ms).collect();
                durations.sort_unstable();
                let ok = group.iter().filter(|r| r.compliant).count();
                let stats = ScenarioStats {
                    requests: group.len(),
                    compliant: ok,
                    compliance_rate: rate(ok, group.len()),
                    avg_ms: durations.iter().sum::<u64>() as f64 / durations.len() as f64,
                    p95_ms: percentile(&durations, 95),
                };
                (scenario, stats)
            })
            .collect();

        // task -> (样本数, 总耗时, 时限占比之和)
        let mut per_task: BTreeMap<TaskKind, (usize, u64, f64)> = BTreeMap::new();
        for record in records {
            for timing in &record.tasks {
                let slot = per_task.entry(timing.task).or_insert((0, 0, 0.0));
                slot.0 += 1;
                slot.1 += timing.duration_ms;
                slot.2 += timing.duration_ms as f64 / record.target_ms.max(1) as f64;
            }
        }
        let slow_tasks = per_task
            .into_iter()
            .filter_map(|(task, (samples, total_ms, share_sum))| {
                let avg_deadline_share = share_sum / samples as f64;
                (avg_deadline_share > slow_task_share).then(|| SlowTask {
                    task,
                    samples,
                    avg_ms: total_ms as f64 / samples as f64,
                    avg_deadline_share,
                })
            })
            .collect();

        Self {
            total,
            compliant,
            compliance_rate: rate(compliant, total),
            per_scenario,
            slow_tasks,
        }
    }
}
