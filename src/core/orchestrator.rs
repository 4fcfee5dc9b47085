//! 编排器：对外入口
//!
//! 负责：根据配置组装风险评分器、缓存、SLA 监控、计划器与调度器，
//! 并把一次请求从计划、执行、合成一路推进到对外响应。对调用方永不返回错误。

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::agents::{LlmTaskBody, TaskBody};
use crate::api::{
    ConfidenceSummary, OrchestrationTrace, Request, Response, ResponseMetadata, Timing,
    Transparency,
};
use crate::cache::{CacheHierarchy, SharedStore};
use crate::config::AppConfig;
use crate::core::state::WarningFlag;
use crate::core::synthesizer::SynthesizedResponse;
use crate::core::task_scheduler::{Execution, TaskScheduler};
use crate::llm::create_llm_from_config;
use crate::risk::{RiskLevel, RiskScorer, RiskSummary};
use crate::sla::SlaMonitor;
use crate::workflow::{ExecutionPlanner, TaskResult};

/// 编排器：持有所有共享服务（显式传入，无全局状态）
pub struct Orchestrator {
    planner: ExecutionPlanner,
    scheduler: TaskScheduler,
    cache: Arc<CacheHierarchy>,
    monitor: Arc<SlaMonitor>,
}

impl Orchestrator {
    /// 从配置组装；store 为 None 时共享层不可用，缓存退化为本地 + 预测
    pub fn from_config(
        cfg: &AppConfig,
        body: Arc<dyn TaskBody>,
        store: Option<Arc<dyn SharedStore>>,
    ) -> Self {
        let scorer = Arc::new(
            RiskScorer::new().with_max_cultural_adjustment(cfg.risk.max_cultural_adjustment),
        );
        let cache = Arc::new(CacheHierarchy::new(cfg.cache.clone(), store));
        let monitor = Arc::new(SlaMonitor::new(cfg.sla.clone()));
        let planner = ExecutionPlanner::new(
            scorer,
            cache.clone(),
            cfg.sla.deadlines.clone(),
            cfg.planner.clone(),
        );
        let scheduler = TaskScheduler::new(body, cache.clone(), monitor.clone());
        Self {
            planner,
            scheduler,
            cache,
            monitor,
        }
    }

    /// 使用配置中的 LLM 后端作为任务体
    pub fn with_llm(cfg: &AppConfig, store: Option<Arc<dyn SharedStore>>) -> Self {
        let llm = create_llm_from_config(&cfg.llm);
        let body = LlmTaskBody::new(llm).with_request_timeout(std::time::Duration::from_secs(
            cfg.llm.request_timeout_secs,
        ));
        Self::from_config(cfg, Arc::new(body), store)
    }

    pub fn cache(&self) -> &Arc<CacheHierarchy> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<SlaMonitor> {
        &self.monitor
    }

    pub fn planner(&self) -> &ExecutionPlanner {
        &self.planner
    }

    /// 处理一条请求
    pub async fn handle(&self, request: Request) -> Response {
        self.handle_with_follow_up(request).await.0
    }

    /// 同 handle；危机计划时额外返回后台任务句柄
    pub async fn handle_with_follow_up(
        &self,
        request: Request,
    ) -> (Response, Option<JoinHandle<Vec<TaskResult>>>) {
        let planning_started = Instant::now();
        let plan = match self.planner.plan(&request).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::error!(request_id = %request.id(), error = %e, "planning failed");
                return (plan_failure(&request), None);
            }
        };
        let planning_ms = planning_started.elapsed().as_millis() as u64;

        let mut execution = self.scheduler.execute(&plan, &request).await;
        let follow_up = execution.follow_up.take();

        let risk_assessment =
            (plan.risk.level != RiskLevel::None).then(|| RiskSummary::from(&plan.risk));
        let total_ms = request.accepted_at().elapsed().as_millis() as u64;
        tracing::info!(
            request_id = %request.id(),
            strategy = plan.strategy.as_str(),
            total_ms,
            deadline_ms = plan.deadline_ms,
            warnings = ?execution.warning_strings(),
            "request handled"
        );

        let orchestration = trace(&request, &plan, &execution, planning_ms, total_ms);
        let response = Response {
            content: execution.response.content.clone(),
            message_id: message_id(),
            conversation_id: conversation_id(&request),
            orchestration,
            metadata: ResponseMetadata {
                response_confidence: execution.response.confidence,
                risk_assessment,
                warning_flags: execution.warning_strings(),
            },
        };
        (response, follow_up)
    }

    /// 用户修改偏好后，失效其缓存条目
    pub async fn update_preferences(&self, user_id: &str) {
        self.cache.on_preference_change(user_id).await;
    }
}

fn trace(
    request: &Request,
    plan: &crate::workflow::ExecutionPlan,
    execution: &Execution,
    planning_ms: u64,
    total_ms: u64,
) -> Option<OrchestrationTrace> {
    let transparency = request.preferences().transparency;
    if transparency == Transparency::Minimal {
        return None;
    }
    Some(OrchestrationTrace {
        strategy: plan.strategy,
        execution_pattern: plan.execution_pattern().to_string(),
        task_results: execution.results.clone(),
        timing: Timing {
            planning_ms,
            scheduling_overhead_ms: execution.timing.scheduling_overhead_ms,
            parallel_ms: execution.timing.parallel_ms,
            synthesis_ms: execution.timing.synthesis_ms,
            total_ms,
        },
        confidence: ConfidenceSummary {
            overall: execution.response.confidence,
            agreement: execution.response.agreement,
        },
        steps: (transparency == Transparency::Detailed).then(|| execution.steps.clone()),
    })
}

/// 计划阶段失败（配置错误等）：返回固定兜底回复
fn plan_failure(request: &Request) -> Response {
    let fallback = SynthesizedResponse::fallback();
    Response {
        content: fallback.content,
        message_id: message_id(),
        conversation_id: conversation_id(request),
        orchestration: None,
        metadata: ResponseMetadata {
            response_confidence: fallback.confidence,
            risk_assessment: None,
            warning_flags: vec![
                WarningFlag::SystemError.to_string(),
                WarningFlag::FallbackResponse.to_string(),
            ],
        },
    }
}

fn message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4())
}

fn conversation_id(request: &Request) -> String {
    request
        .conversation_id()
        .map(String::from)
        .unwrap_or_else(|| format!("conv_{}", uuid::Uuid::new_v4()))
}
