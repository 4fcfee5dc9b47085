//! 任务调度器
//!
//! 按拓扑层次逐组执行计划：
//! - 组内任务各自 tokio::spawn，用 join_all 一起等待；每个任务有独立的子超时（扣除安全余量后的剩余预算 / 剩余组数）
//! - 任务启动前先查缓存；权威命中直接生成结果，预测层命中只作为提示传给任务体
//! - 每组之前询问 SLA 监控器，必要时按降级阶梯处理
//! - 超时的任务不会被强制终止：它的缓存写入仍会完成，但结果不进入本次回复
//! - 危机计划立即返回固定安全回复，任务在后台继续执行

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::agents::{TaskBody, TaskInput, TaskOutput, TaskPayload};
use crate::api::Request;
use crate::cache::{CacheContext, CacheHierarchy, CacheKey, CacheStrategy, CacheTier};
use crate::core::degradation::{DegradationLadder, LadderStep};
use crate::core::state::{push_flag, ExecutionStep, StepLog, WarningFlag};
use crate::core::synthesizer::{ResponseSynthesizer, SynthesizedResponse};
use crate::core::TaskError;
use crate::risk::RiskSummary;
use crate::sla::{SlaMonitor, SlaRecord};
use crate::workflow::{ExecutionPlan, PlanStrategy, ResultSource, TaskKind, TaskResult};

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

/// 调度耗时拆分
#[derive(Debug, Clone, Default)]
pub struct ExecutionTiming {
    pub scheduling_overhead_ms: u64,
    pub parallel_ms: u64,
    pub synthesis_ms: u64,
}

/// 一次执行的最终结果
#[derive(Debug)]
pub struct Execution {
    pub plan_id: String,
    pub results: Vec<TaskResult>,
    pub response: SynthesizedResponse,
    pub steps: Vec<ExecutionStep>,
    pub warnings: Vec<WarningFlag>,
    pub timing: ExecutionTiming,
    pub sla: Option<SlaRecord>,
    /// 危机计划：后台任务的结果
    pub follow_up: Option<JoinHandle<Vec<TaskResult>>>,
}

impl Execution {
    pub fn warning_strings(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

/// 只追加的结果列表；任务的前置任务必须已有结果
#[derive(Debug, Default)]
pub struct ResultLog {
    results: Vec<TaskResult>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前置任务缺少结果时拒绝追加，返回缺失的前置任务
    pub fn push(&mut self, plan: &ExecutionPlan, result: TaskResult) -> Result<(), TaskKind> {
        let done = self.completed();
        if let Some(missing) = plan
            .prerequisites(result.task)
            .iter()
            .find(|p| !done.contains(p))
        {
            return Err(*missing);
        }
        self.results.push(result);
        Ok(())
    }

    /// 已有结果（成功或失败）的任务
    pub fn completed(&self) -> BTreeSet<TaskKind> {
        self.results.iter().map(|r| r.task).collect()
    }

    /// 成功的前置结果
    pub fn payloads_for(&self, prerequisites: &[TaskKind]) -> BTreeMap<TaskKind, TaskPayload> {
        self.results
            .iter()
            .filter(|r| r.success && prerequisites.contains(&r.task))
            .filter_map(|r| r.payload.clone().map(|p| (r.task, p)))
            .collect()
    }

    pub fn any_success(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }

    pub fn results(&self) -> &[TaskResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<TaskResult> {
        self.results
    }
}

enum UnitOutcome {
    Live(TaskOutput),
    Cached(TaskOutput, CacheTier),
    Failed(TaskError),
}

/// 一个任务在组内的完成情况
struct Finished {
    result: TaskResult,
    cache_tier: Option<CacheTier>,
    error: Option<TaskError>,
}

/// 单个任务的执行单元：缓存查询 + 任务体 + 缓存回写
#[derive(Clone)]
pub struct TaskRunner {
    body: Arc<dyn TaskBody>,
    cache: Arc<CacheHierarchy>,
}

impl TaskRunner {
    pub fn new(body: Arc<dyn TaskBody>, cache: Arc<CacheHierarchy>) -> Self {
        Self { body, cache }
    }

    async fn run_unit(self, mut input: TaskInput, sensitive: bool) -> UnitOutcome {
        let kind = input.kind;
        let key = CacheKey::task(kind, &input.user_id, &input.message);
        let ctx = CacheContext::new(input.user_id.clone())
            .for_task(kind)
            .sensitive(sensitive);

        if let Some(hit) = self.cache.get(&key, &ctx).await {
            match serde_json::from_value::<TaskOutput>(hit.value) {
                Ok(output) if hit.authoritative && output.payload.matches(kind) => {
                    return UnitOutcome::Cached(output, hit.tier);
                }
                Ok(output) => input.hint = Some(output.payload),
                Err(e) => tracing::debug!(%kind, error = %e, "unreadable cache entry ignored"),
            }
        }

        match self.body.run(&input).await {
            Ok(output) if !output.payload.matches(kind) => UnitOutcome::Failed(
                TaskError::malformed(kind, "payload kind does not match task"),
            ),
            Ok(output) => {
                let ctx = ctx.with_confidence(output.confidence);
                if let Ok(value) = serde_json::to_value(&output) {
                    self.cache.set(&key, value, &ctx, CacheStrategy::Auto).await;
                }
                UnitOutcome::Live(output)
            }
            Err(e) => UnitOutcome::Failed(e),
        }
    }

    /// 并发执行一组任务；每个任务最多等待 sub_timeout
    async fn run_group(
        &self,
        plan: &ExecutionPlan,
        group: &[TaskKind],
        request: &Request,
        results: &ResultLog,
        sub_timeout: Duration,
    ) -> Vec<Finished> {
        let origin = request.accepted_at();
        let risk = RiskSummary::from(&plan.risk);
        let sensitive = plan.risk.is_sensitive();

        let units: Vec<_> = group
            .iter()
            .map(|&task| {
                let input = TaskInput {
                    kind: task,
                    message: request.message().to_string(),
                    user_id: request.user_id().to_string(),
                    conversation_id: request.conversation_id().map(String::from),
                    risk: risk.clone(),
                    prerequisites: results.payloads_for(plan.prerequisites(task)),
                    hint: None,
                };
                let start = millis(origin.elapsed());
                let handle = tokio::spawn(self.clone().run_unit(input, sensitive));
                async move {
                    let outcome = match timeout(sub_timeout, handle).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => UnitOutcome::Failed(TaskError::Join(e.to_string())),
                        Err(_) => UnitOutcome::Failed(TaskError::Timeout(task)),
                    };
                    finish(task, start, millis(origin.elapsed()), outcome)
                }
            })
            .collect();

        join_all(units).await
    }
}

fn succeeded(
    task: TaskKind,
    start_offset_ms: u64,
    end_offset_ms: u64,
    output: TaskOutput,
    source: ResultSource,
) -> TaskResult {
    TaskResult {
        task,
        start_offset_ms,
        end_offset_ms,
        payload: Some(output.payload),
        confidence: output.confidence.clamp(0.0, 1.0),
        success: true,
        influence_weight: task.priority_weight(),
        source,
        error: None,
        insights: output.insights,
    }
}

fn finish(task: TaskKind, start_offset_ms: u64, end_offset_ms: u64, outcome: UnitOutcome) -> Finished {
    let (outcome_name, finished) = match outcome {
        UnitOutcome::Live(output) => (
            "ok",
            Finished {
                result: succeeded(task, start_offset_ms, end_offset_ms, output, ResultSource::Live),
                cache_tier: None,
                error: None,
            },
        ),
        UnitOutcome::Cached(output, tier) => (
            "cache_hit",
            Finished {
                result: succeeded(
                    task,
                    start_offset_ms,
                    end_offset_ms,
                    output,
                    ResultSource::Cache { tier },
                ),
                cache_tier: Some(tier),
                error: None,
            },
        ),
        UnitOutcome::Failed(error) => (
            error.outcome(),
            Finished {
                result: TaskResult {
                    task,
                    start_offset_ms,
                    end_offset_ms,
                    payload: None,
                    confidence: 0.0,
                    success: false,
                    influence_weight: 0.0,
                    source: ResultSource::Live,
                    error: Some(error.to_string()),
                    insights: Vec::new(),
                },
                cache_tier: None,
                error: Some(error),
            },
        ),
    };

    let audit = json!({
        "event": "task_audit",
        "task": task.as_str(),
        "ok": finished.result.success,
        "outcome": outcome_name,
        "duration_ms": finished.result.duration_ms(),
    });
    tracing::info!(audit = %audit.to_string(), "task");
    finished
}

/// 任务调度器
pub struct TaskScheduler {
    runner: TaskRunner,
    monitor: Arc<SlaMonitor>,
    synthesizer: ResponseSynthesizer,
}

impl TaskScheduler {
    pub fn new(body: Arc<dyn TaskBody>, cache: Arc<CacheHierarchy>, monitor: Arc<SlaMonitor>) -> Self {
        Self {
            runner: TaskRunner::new(body, cache),
            monitor,
            synthesizer: ResponseSynthesizer::new(),
        }
    }

    pub fn monitor(&self) -> &Arc<SlaMonitor> {
        &self.monitor
    }

    /// 执行计划；单个任务的失败只会变成失败结果和警告标记
    pub async fn execute(&self, plan: &ExecutionPlan, request: &Request) -> Execution {
        let scheduling_started = Instant::now();
        let request_id = request.id().to_string();
        let mut log = StepLog::new(request.accepted_at());

        self.monitor
            .start_with_target(&request_id, plan.scenario, plan.deadline_ms, request.accepted_at())
            .await;
        log.push(ExecutionStep::PlanAccepted {
            plan_id: plan.id.clone(),
            strategy: plan.strategy,
            deadline_ms: plan.deadline_ms,
            tasks: plan.tasks.clone(),
            at_ms: log.now_ms(),
        });

        if plan.strategy == PlanStrategy::CrisisPriority {
            return self.execute_crisis(plan, request, log, scheduling_started).await;
        }

        // 任务只能用到 deadline - reserve，保留的部分用于综合回复和结束计时
        let reserve_ms = self
            .monitor
            .config()
            .safety_buffer_ms()
            .min(plan.deadline_ms / 2);
        let usable = Duration::from_millis(plan.deadline_ms - reserve_ms);
        let mut current = plan.clone();
        let mut results = ResultLog::new();
        let mut ladder = DegradationLadder::new();
        let mut warnings: Vec<WarningFlag> = Vec::new();
        let mut abandoned = false;
        let mut parallel = Duration::ZERO;
        let mut group_index = 0usize;

        loop {
            let completed = results.completed();
            let pending_groups: Vec<Vec<TaskKind>> = current
                .groups
                .iter()
                .map(|g| g.iter().copied().filter(|t| !completed.contains(t)).collect::<Vec<_>>())
                .filter(|g| !g.is_empty())
                .collect();
            let Some(group) = pending_groups.first() else {
                break;
            };

            let mut estimate = 0;
            for task in group {
                estimate = estimate.max(self.monitor.estimate_task_ms(*task).await);
            }

            if let Some(prediction) = self.monitor.predict_for(&request_id, estimate).await {
                match ladder.decide(&current, &completed, &prediction) {
                    Ok(Some(degradation)) if degradation.step == LadderStep::Abandon => {
                        tracing::warn!(
                            request_id = %request_id,
                            elapsed_ms = prediction.elapsed_ms,
                            abandoned = ?degradation.removed,
                            "deadline nearly spent, abandoning remaining tasks"
                        );
                        log.push(ExecutionStep::Abandoned {
                            tasks: degradation.removed,
                            at_ms: log.now_ms(),
                        });
                        abandoned = true;
                        break;
                    }
                    Ok(Some(degradation)) => {
                        tracing::info!(
                            request_id = %request_id,
                            step = ?degradation.step,
                            removed = ?degradation.removed,
                            "plan degraded"
                        );
                        log.push(ExecutionStep::Degraded {
                            step: degradation.step,
                            removed: degradation.removed,
                            at_ms: log.now_ms(),
                        });
                        if let Some(next) = degradation.plan {
                            current = next;
                        }
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(request_id = %request_id, error = %e, "degradation failed, keeping plan");
                    }
                }
            }

            let remaining = usable.saturating_sub(request.accepted_at().elapsed());
            if remaining.is_zero() {
                log.push(ExecutionStep::Abandoned {
                    tasks: pending_groups.iter().flatten().copied().collect(),
                    at_ms: log.now_ms(),
                });
                abandoned = true;
                break;
            }
            let sub_timeout = remaining / pending_groups.len() as u32;

            log.push(ExecutionStep::GroupStarted {
                index: group_index,
                tasks: group.clone(),
                sub_timeout_ms: millis(sub_timeout),
                at_ms: log.now_ms(),
            });
            group_index += 1;

            let group_started = Instant::now();
            let finished = self
                .runner
                .run_group(&current, group, request, &results, sub_timeout)
                .await;
            parallel += group_started.elapsed();

            for Finished { result, cache_tier, error } in finished {
                self.monitor
                    .record_task(
                        &request_id,
                        result.task,
                        result.start_offset_ms,
                        result.duration_ms(),
                        result.success,
                    )
                    .await;
                record_step(&mut log, &mut warnings, &result, cache_tier, error, sub_timeout);
                let task = result.task;
                if let Err(missing) = results.push(&current, result) {
                    tracing::error!(%task, %missing, "result dropped, prerequisite has no result");
                }
            }
        }

        let synthesis_started = Instant::now();
        let response = if abandoned || !results.any_success() {
            let reason = if abandoned { "deadline" } else { "no_successful_tasks" };
            if !abandoned {
                push_flag(&mut warnings, WarningFlag::SystemError);
            }
            push_flag(&mut warnings, WarningFlag::FallbackResponse);
            log.push(ExecutionStep::FallbackEmitted {
                reason: reason.to_string(),
                at_ms: log.now_ms(),
            });
            SynthesizedResponse::fallback()
        } else {
            let response = self.synthesizer.synthesize(results.results());
            if response.fallback {
                push_flag(&mut warnings, WarningFlag::FallbackResponse);
                log.push(ExecutionStep::FallbackEmitted {
                    reason: "no_reply".to_string(),
                    at_ms: log.now_ms(),
                });
            } else {
                log.push(ExecutionStep::Synthesized {
                    primary: response.primary,
                    confidence: response.confidence,
                    at_ms: log.now_ms(),
                });
            }
            response
        };
        let synthesis = synthesis_started.elapsed();

        let sla = self.monitor.complete(&request_id).await;
        let total = scheduling_started.elapsed();

        Execution {
            plan_id: plan.id.clone(),
            results: results.into_results(),
            response,
            steps: log.into_steps(),
            warnings,
            timing: ExecutionTiming {
                scheduling_overhead_ms: millis(total.saturating_sub(parallel + synthesis)),
                parallel_ms: millis(parallel),
                synthesis_ms: millis(synthesis),
            },
            sla,
            follow_up: None,
        }
    }

    /// 危机计划：不等待任何任务，立即回复；任务结果在后台产出
    async fn execute_crisis(
        &self,
        plan: &ExecutionPlan,
        request: &Request,
        mut log: StepLog,
        scheduling_started: Instant,
    ) -> Execution {
        let request_id = request.id().to_string();
        tracing::warn!(
            request_id = %request_id,
            user_id = request.user_id(),
            "crisis protocol, replying before tasks run"
        );

        let runner = self.runner.clone();
        let background_plan = plan.clone();
        let background_request = request.clone();
        let follow_up = tokio::spawn(async move {
            run_in_background(runner, background_plan, background_request).await
        });

        log.push(ExecutionStep::CrisisReplyEmitted {
            background_tasks: plan.tasks.clone(),
            at_ms: log.now_ms(),
        });
        let sla = self.monitor.complete(&request_id).await;

        Execution {
            plan_id: plan.id.clone(),
            results: Vec::new(),
            response: SynthesizedResponse::crisis(),
            steps: log.into_steps(),
            warnings: vec![WarningFlag::CrisisProtocol],
            timing: ExecutionTiming {
                scheduling_overhead_ms: millis(scheduling_started.elapsed()),
                ..Default::default()
            },
            sla,
            follow_up: Some(follow_up),
        }
    }
}

/// 后台执行危机计划的全部任务，不经过降级阶梯；每组最多等待一个完整时限
async fn run_in_background(runner: TaskRunner, plan: ExecutionPlan, request: Request) -> Vec<TaskResult> {
    let sub_timeout = Duration::from_millis(plan.deadline_ms);
    let mut results = ResultLog::new();
    for group in &plan.groups {
        let finished = runner
            .run_group(&plan, group, &request, &results, sub_timeout)
            .await;
        for Finished { result, .. } in finished {
            let task = result.task;
            if let Err(missing) = results.push(&plan, result) {
                tracing::error!(%task, %missing, "background result dropped");
            }
        }
    }
    tracing::info!(
        request_id = %request.id(),
        succeeded = results.results().iter().filter(|r| r.success).count(),
        "crisis follow-up finished"
    );
    results.into_results()
}

fn record_step(
    log: &mut StepLog,
    warnings: &mut Vec<WarningFlag>,
    result: &TaskResult,
    cache_tier: Option<CacheTier>,
    error: Option<TaskError>,
    sub_timeout: Duration,
) {
    let at_ms = result.end_offset_ms;
    if let Some(tier) = cache_tier {
        log.push(ExecutionStep::CacheHit {
            task: result.task,
            tier,
            at_ms,
        });
    }
    match error {
        None => log.push(ExecutionStep::TaskCompleted {
            task: result.task,
            duration_ms: result.duration_ms(),
            confidence: result.confidence,
            at_ms,
        }),
        Some(TaskError::Timeout(task)) => {
            push_flag(warnings, WarningFlag::TaskTimeout(task));
            log.push(ExecutionStep::TaskTimedOut {
                task,
                timeout_ms: millis(sub_timeout),
                at_ms,
            });
        }
        Some(error) => {
            tracing::warn!(task = %result.task, error = %error, "task failed");
            push_flag(warnings, WarningFlag::TaskFailed(result.task));
            log.push(ExecutionStep::TaskFailed {
                task: result.task,
                error: error.to_string(),
                at_ms,
            });
        }
    }
}
