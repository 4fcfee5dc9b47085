//! 执行计划器
//!
//! 1. 先调用风险评分器；Critical 或紧急提示为 crisis 时直接返回固定的危机计划
//! 2. 非危机：按启发式把消息分为 simple / supportive / deep（分类结果可命中缓存）
//! 3. 复杂度映射到固定模板（任务集、并发组、依赖、时限）
//! 4. 用户偏好 fast：按系数缩短时限，并把可选任务标为可丢弃
//!
//! Planner 只产出静态计划，不执行任何任务。

use std::sync::Arc;

use crate::api::{Request, SpeedPreference, UrgencyHint};
use crate::cache::{CacheContext, CacheHierarchy, CacheKey, CacheStrategy};
use crate::config::{DeadlineSection, PlannerSection};
use crate::risk::{RiskScore, RiskScorer};
use crate::workflow::{
    Complexity, ComplexityClassifier, ExecutionPlan, PlanBuilder, PlanError, PlanStrategy,
    Scenario, TaskKind,
};

/// 执行计划器
pub struct ExecutionPlanner {
    scorer: Arc<RiskScorer>,
    classifier: ComplexityClassifier,
    cache: Arc<CacheHierarchy>,
    deadlines: DeadlineSection,
    settings: PlannerSection,
}

impl ExecutionPlanner {
    pub fn new(
        scorer: Arc<RiskScorer>,
        cache: Arc<CacheHierarchy>,
        deadlines: DeadlineSection,
        settings: PlannerSection,
    ) -> Self {
        Self {
            scorer,
            classifier: ComplexityClassifier::new(),
            cache,
            deadlines,
            settings,
        }
    }

    /// 为请求生成执行计划
    pub async fn plan(&self, request: &Request) -> Result<ExecutionPlan, PlanError> {
        let risk = self
            .scorer
            .score(request.message(), request.cultural_context());

        // 风险状态进入 Critical：先失效该用户的缓存计划与任务结果
        self.cache
            .on_risk_transition(request.user_id(), risk.level)
            .await;

        if risk.is_critical() || request.urgency_hint() == UrgencyHint::Crisis {
            tracing::warn!(
                request_id = %request.id(),
                level = risk.level.as_str(),
                immediacy = risk.immediacy,
                urgency = ?request.urgency_hint(),
                "crisis signal, using crisis_priority plan"
            );
            return crisis_plan(risk, self.deadlines.crisis_ms);
        }

        let mut complexity = self.complexity(request, &risk).await;
        if request.urgency_hint() == UrgencyHint::Elevated && complexity == Complexity::Simple {
            complexity = Complexity::Supportive;
        }

        let fast = request.preferences().speed == SpeedPreference::Fast;
        let mut deadline_ms = self.deadlines.for_scenario(complexity.scenario());
        if fast {
            deadline_ms = (deadline_ms as f64 * self.settings.fast_deadline_factor()).round() as u64;
        }

        let plan = template(complexity, risk, deadline_ms, fast)?;
        tracing::debug!(
            request_id = %request.id(),
            strategy = plan.strategy.as_str(),
            deadline_ms = plan.deadline_ms,
            tasks = ?plan.tasks,
            "plan built"
        );
        Ok(plan)
    }

    /// 分类结果按 (用户, 归一化消息) 缓存；风险评分总是在缓存之前重新计算
    async fn complexity(&self, request: &Request, risk: &RiskScore) -> Complexity {
        let key = CacheKey::plan(request.user_id(), request.message());
        let ctx = CacheContext::new(request.user_id()).sensitive(risk.is_sensitive());

        if let Some(hit) = self.cache.get(&key, &ctx).await {
            if hit.authoritative {
                if let Ok(complexity) = serde_json::from_value::<Complexity>(hit.value) {
                    tracing::debug!(request_id = %request.id(), tier = ?hit.tier, "plan cache hit");
                    return complexity;
                }
            }
        }

        let complexity = self.classifier.classify(request.message());
        if let Ok(value) = serde_json::to_value(complexity) {
            self.cache
                .set(&key, value, &ctx, CacheStrategy::LocalOnly)
                .await;
        }
        complexity
    }
}

/// 固定危机计划：risk_responder -> support_advisor
pub fn crisis_plan(risk: RiskScore, deadline_ms: u64) -> Result<ExecutionPlan, PlanError> {
    PlanBuilder::new(PlanStrategy::CrisisPriority, Scenario::Crisis)
        .task(TaskKind::RiskResponder)
        .task(TaskKind::SupportAdvisor)
        .sequential(TaskKind::RiskResponder, TaskKind::SupportAdvisor)
        .deadline_ms(deadline_ms)
        .risk(risk)
        .build()
}

/// 复杂度 -> 计划模板
pub fn template(
    complexity: Complexity,
    risk: RiskScore,
    deadline_ms: u64,
    fast: bool,
) -> Result<ExecutionPlan, PlanError> {
    let builder = match complexity {
        Complexity::Simple => PlanBuilder::new(PlanStrategy::SingleAgent, Scenario::CheckIn)
            .task(TaskKind::CheckInResponder),
        // 两个并发分析 -> 一个依赖两者的综合任务
        Complexity::Supportive => {
            PlanBuilder::new(PlanStrategy::ParallelSupport, Scenario::EmotionalSupport)
                .task(TaskKind::EmotionAnalyzer)
                .optional_task(TaskKind::ContextMemory)
                .task(TaskKind::SupportAdvisor)
                .depends_on_all(
                    TaskKind::SupportAdvisor,
                    vec![TaskKind::EmotionAnalyzer, TaskKind::ContextMemory],
                )
        }
        // 三个并发，建议任务只串行依赖记忆/上下文任务
        Complexity::Deep => PlanBuilder::new(PlanStrategy::DeepAnalysis, Scenario::DeepSupport)
            .task(TaskKind::ContextMemory)
            .task(TaskKind::EmotionAnalyzer)
            .optional_task(TaskKind::ProgressTracker)
            .task(TaskKind::SupportAdvisor)
            .sequential(TaskKind::ContextMemory, TaskKind::SupportAdvisor),
    };

    let builder = builder
        .complexity(complexity)
        .deadline_ms(deadline_ms)
        .risk(risk);
    let builder = if fast {
        builder.droppable_optional()
    } else {
        builder
    };
    builder.build()
}
