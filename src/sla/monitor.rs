//! SLA 监控器
//!
//! - start / record_task / complete：每个请求一份计时账本
//! - predict：在每个任务组之前判断剩余预算是否够用，并按剩余预算给出逐级升级的建议动作
//! - complete 把记录写入有界滚动窗口（条数 + 时长双重上限）；统计只从窗口中的记录计算

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::SlaSection;
use crate::sla::{ComplianceStats, SlaAction, SlaPrediction, SlaRecord, TaskTiming};
use crate::workflow::{Scenario, TaskKind};

struct ActiveRequest {
    scenario: Scenario,
    target_ms: u64,
    started: Instant,
    started_at: DateTime<Utc>,
    tasks: Vec<TaskTiming>,
}

pub struct SlaMonitor {
    cfg: SlaSection,
    active: Mutex<HashMap<String, ActiveRequest>>,
    history: Mutex<VecDeque<SlaRecord>>,
}

impl SlaMonitor {
    pub fn new(cfg: SlaSection) -> Self {
        Self {
            cfg,
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &SlaSection {
        &self.cfg
    }

    /// 按场景的默认时限开始计时
    pub async fn start(&self, request_id: &str, scenario: Scenario) {
        let target_ms = self.cfg.deadlines.for_scenario(scenario);
        self.start_with_target(request_id, scenario, target_ms, Instant::now())
            .await;
    }

    /// 计划可能缩短了时限（fast 偏好），计时起点为请求被接受的时刻
    pub async fn start_with_target(
        &self,
        request_id: &str,
        scenario: Scenario,
        target_ms: u64,
        started: Instant,
    ) {
        let started_at = Utc::now()
            - chrono::Duration::milliseconds(started.elapsed().as_millis() as i64);
        self.active.lock().await.insert(
            request_id.to_string(),
            ActiveRequest {
                scenario,
                target_ms,
                started,
                started_at,
                tasks: Vec::new(),
            },
        );
    }

    pub async fn record_task(
        &self,
        request_id: &str,
        task: TaskKind,
        start_offset_ms: u64,
        duration_ms: u64,
        success: bool,
    ) {
        let mut active = self.active.lock().await;
        match active.get_mut(request_id) {
            Some(request) => request.tasks.push(TaskTiming {
                task,
                start_offset_ms,
                duration_ms,
                success,
            }),
            None => tracing::debug!(request_id, %task, "timing for unknown request ignored"),
        }
    }

    /// 结束请求：合规性在此处计算且只计算一次
    pub async fn complete(&self, request_id: &str) -> Option<SlaRecord> {
        let request = self.active.lock().await.remove(request_id)?;
        let duration_ms = request.started.elapsed().as_millis() as u64;
        let record = SlaRecord {
            request_id: request_id.to_string(),
            scenario: request.scenario,
            target_ms: request.target_ms,
            started_at: request.started_at,
            ended_at: request.started_at + chrono::Duration::milliseconds(duration_ms as i64),
            duration_ms,
            tasks: request.tasks,
            compliant: duration_ms <= request.target_ms,
        };

        if !record.compliant {
            tracing::warn!(
                request_id,
                scenario = record.scenario.as_str(),
                duration_ms,
                target_ms = record.target_ms,
                "sla missed"
            );
        }

        let mut history = self.history.lock().await;
        history.push_back(record.clone());
        while history.len() > self.cfg.history_capacity.max(1) {
            history.pop_front();
        }
        Some(record)
    }

    pub async fn predict(&self, request_id: &str) -> Option<SlaPrediction> {
        self.predict_for(request_id, 0).await
    }

    /// next_estimate_ms：下一组任务的预计耗时（组内并发，取最大值）
    pub async fn predict_for(&self, request_id: &str, next_estimate_ms: u64) -> Option<SlaPrediction> {
        let active = self.active.lock().await;
        let request = active.get(request_id)?;
        Some(self.assess(
            request.started.elapsed().as_millis() as u64,
            request.target_ms,
            next_estimate_ms,
        ))
    }

    fn assess(&self, elapsed_ms: u64, target_ms: u64, next_estimate_ms: u64) -> SlaPrediction {
        let remaining_ms = target_ms.saturating_sub(elapsed_ms);
        let usable_ms = remaining_ms.saturating_sub(self.cfg.safety_buffer_ms());
        let fallback_at = (target_ms as f64 * self.cfg.fallback_threshold) as u64;

        let recommended_actions = if elapsed_ms >= fallback_at {
            vec![
                SlaAction::EnableFastPath,
                SlaAction::SkipOptionalTasks,
                SlaAction::ReturnFallback,
            ]
        } else if next_estimate_ms > usable_ms {
            vec![SlaAction::EnableFastPath, SlaAction::SkipOptionalTasks]
        } else if next_estimate_ms.saturating_mul(5) > usable_ms.saturating_mul(4) {
            // 余量不足 25%
            vec![SlaAction::EnableFastPath]
        } else {
            Vec::new()
        };

        SlaPrediction {
            likely: elapsed_ms < fallback_at && next_estimate_ms <= usable_ms,
            elapsed_ms,
            remaining_ms,
            usable_ms,
            recommended_actions,
        }
    }

    /// 历史平均耗时；没有样本时使用配置的默认值
    pub async fn estimate_task_ms(&self, task: TaskKind) -> u64 {
        let history = self.history.lock().await;
        let (count, total) = history
            .iter()
            .flat_map(|r| r.tasks.iter())
            .filter(|t| t.task == task && t.success)
            .fold((0u64, 0u64), |(n, sum), t| (n + 1, sum + t.duration_ms));
        if count == 0 {
            self.cfg.default_task_estimate_ms
        } else {
            total / count
        }
    }

    pub async fn stats(&self) -> ComplianceStats {
        let history = self.history.lock().await;
        let records: Vec<SlaRecord> = history.iter().cloned().collect();
        ComplianceStats::from_records(&records, self.cfg.slow_task_share)
    }

    pub async fn records(&self) -> Vec<SlaRecord> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn in_flight(&self) -> usize {
        self.active.lock().await.len()
    }

    /// 删除超出时长上限的记录
    pub async fn trim(&self) -> usize {
        self.trim_older_than(Utc::now()).await
    }

    pub async fn trim_older_than(&self, now: DateTime<Utc>) -> usize {
        let max_age = chrono::Duration::seconds(self.cfg.history_max_age_secs as i64);
        let mut history = self.history.lock().await;
        let before = history.len();
        history.retain(|r| now - r.ended_at <= max_age);
        before - history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn monitor() -> SlaMonitor {
        SlaMonitor::new(SlaSection::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_computes_compliance_once() {
        let m = monitor();
        m.start("r1", Scenario::CheckIn).await;
        m.record_task("r1", TaskKind::CheckInResponder, 0, 300, true).await;
        tokio::time::advance(Duration::from_millis(400)).await;
        let record = m.complete("r1").await.unwrap();

        assert_eq!(record.target_ms, 1500);
        assert_eq!(record.duration_ms, 400);
        assert!(record.compliant);
        assert_eq!(record.tasks.len(), 1);
        assert_eq!(
            (record.ended_at - record.started_at).num_milliseconds(),
            record.duration_ms as i64
        );
        // 第二次 complete 不会再产生记录
        assert!(m.complete("r1").await.is_none());
        assert_eq!(m.records().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_deadline_not_compliant() {
        let m = monitor();
        m.start("r1", Scenario::Crisis).await;
        tokio::time::advance(Duration::from_millis(1801)).await;
        assert!(!m.complete("r1").await.unwrap().compliant);
        assert_eq!(m.stats().await.compliant, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predictions_escalate() {
        let m = monitor();
        m.start_with_target("r1", Scenario::EmotionalSupport, 3000, Instant::now())
            .await;

        let fresh = m.predict_for("r1", 500).await.unwrap();
        assert!(fresh.likely);
        assert!(fresh.recommended_actions.is_empty());
        assert_eq!(fresh.usable_ms, 3000 - 250);

        tokio::time::advance(Duration::from_millis(2000)).await;
        let tight = m.predict_for("r1", 800).await.unwrap();
        assert!(!tight.likely);
        assert_eq!(
            tight.recommended_actions,
            vec![SlaAction::EnableFastPath, SlaAction::SkipOptionalTasks]
        );

        tokio::time::advance(Duration::from_millis(750)).await;
        let late = m.predict("r1").await.unwrap();
        assert!(late.recommended_actions.contains(&SlaAction::ReturnFallback));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let mut cfg = SlaSection::default();
        cfg.history_capacity = 3;
        let m = SlaMonitor::new(cfg);
        for i in 0..5 {
            let id = format!("r{}", i);
            m.start(&id, Scenario::CheckIn).await;
            m.complete(&id).await;
        }
        let records = m.records().await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].request_id, "r2");
    }

    #[tokio::test]
    async fn test_trim_by_age() {
        let m = monitor();
        m.start("r1", Scenario::CheckIn).await;
        m.complete("r1").await;
        assert_eq!(m.trim().await, 0);
        let later = Utc::now() + chrono::Duration::hours(25);
        assert_eq!(m.trim_older_than(later).await, 1);
        assert!(m.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_estimate_uses_history() {
        let m = monitor();
        assert_eq!(m.estimate_task_ms(TaskKind::EmotionAnalyzer).await, 500);
        m.start("r1", Scenario::EmotionalSupport).await;
        m.record_task("r1", TaskKind::EmotionAnalyzer, 0, 100, true).await;
        m.record_task("r1", TaskKind::EmotionAnalyzer, 0, 300, true).await;
        m.complete("r1").await;
        assert_eq!(m.estimate_task_ms(TaskKind::EmotionAnalyzer).await, 200);
    }
}
