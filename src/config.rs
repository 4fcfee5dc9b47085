//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ATTUNE__*` 覆盖（双下划线表示嵌套，如 `ATTUNE__SLA__SAFETY_BUFFER_MS=300`）。
//! 每个字段都有默认值，空配置即可运行。

use std::path::PathBuf;

use serde::Deserialize;

use crate::workflow::Scenario;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub sla: SlaSection,
    pub planner: PlannerSection,
    pub cache: CacheSection,
    pub risk: RiskSection,
    pub llm: LlmSection,
    pub jobs: JobsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [sla] 段：各场景时延预算与滚动窗口
#[derive(Debug, Clone, Deserialize)]
pub struct SlaSection {
    #[serde(default)]
    pub deadlines: DeadlineSection,
    /// 预测时从剩余预算中扣除的安全余量（不小于 200ms）
    #[serde(default = "default_safety_buffer_ms")]
    pub safety_buffer_ms: u64,
    /// 已用时间超过预算的该比例时直接放弃剩余任务
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_history_max_age_secs")]
    pub history_max_age_secs: u64,
    /// 历史中没有数据时单个任务的预估耗时
    #[serde(default = "default_task_estimate_ms")]
    pub default_task_estimate_ms: u64,
    /// 任务平均耗时占请求预算超过该比例即视为慢任务
    #[serde(default = "default_slow_task_share")]
    pub slow_task_share: f64,
}

fn default_safety_buffer_ms() -> u64 {
    250
}

fn default_fallback_threshold() -> f64 {
    0.9
}

fn default_history_capacity() -> usize {
    1000
}

fn default_history_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_task_estimate_ms() -> u64 {
    500
}

fn default_slow_task_share() -> f64 {
    0.5
}

impl SlaSection {
    /// 安全余量下限 200ms
    pub fn safety_buffer_ms(&self) -> u64 {
        self.safety_buffer_ms.max(200)
    }
}

impl Default for SlaSection {
    fn default() -> Self {
        Self {
            deadlines: DeadlineSection::default(),
            safety_buffer_ms: default_safety_buffer_ms(),
            fallback_threshold: default_fallback_threshold(),
            history_capacity: default_history_capacity(),
            history_max_age_secs: default_history_max_age_secs(),
            default_task_estimate_ms: default_task_estimate_ms(),
            slow_task_share: default_slow_task_share(),
        }
    }
}

/// [sla.deadlines] 段：每个场景的端到端时延上限（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct DeadlineSection {
    #[serde(default = "default_check_in_ms")]
    pub check_in_ms: u64,
    #[serde(default = "default_emotional_support_ms")]
    pub emotional_support_ms: u64,
    #[serde(default = "default_deep_support_ms")]
    pub deep_support_ms: u64,
    #[serde(default = "default_crisis_ms")]
    pub crisis_ms: u64,
}

fn default_check_in_ms() -> u64 {
    1500
}

fn default_emotional_support_ms() -> u64 {
    3000
}

fn default_deep_support_ms() -> u64 {
    8000
}

fn default_crisis_ms() -> u64 {
    1800
}

impl DeadlineSection {
    pub fn for_scenario(&self, scenario: Scenario) -> u64 {
        match scenario {
            Scenario::CheckIn => self.check_in_ms,
            Scenario::EmotionalSupport => self.emotional_support_ms,
            Scenario::DeepSupport => self.deep_support_ms,
            Scenario::Crisis => self.crisis_ms,
        }
    }
}

impl Default for DeadlineSection {
    fn default() -> Self {
        Self {
            check_in_ms: default_check_in_ms(),
            emotional_support_ms: default_emotional_support_ms(),
            deep_support_ms: default_deep_support_ms(),
            crisis_ms: default_crisis_ms(),
        }
    }
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    /// 用户偏好 fast 时的预算缩放系数（截断到 [0.6, 1.0]）
    #[serde(default = "default_fast_deadline_factor")]
    pub fast_deadline_factor: f64,
}

fn default_fast_deadline_factor() -> f64 {
    0.7
}

impl PlannerSection {
    pub fn fast_deadline_factor(&self) -> f64 {
        self.fast_deadline_factor.clamp(0.6, 1.0)
    }
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            fast_deadline_factor: default_fast_deadline_factor(),
        }
    }
}

/// [cache] 段：三级缓存容量、TTL 与可缓存阈值
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    /// Tier 1 容量（条目数，LRU 淘汰）
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,
    #[serde(default = "default_base_ttl_secs")]
    pub base_ttl_secs: u64,
    #[serde(default = "default_min_ttl_secs")]
    pub min_ttl_secs: u64,
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,
    /// 低于该置信度的结果一律不缓存
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,
    /// 高于该置信度的结果写入 Tier 2
    #[serde(default = "default_durable_confidence")]
    pub durable_confidence: f32,
    #[serde(default = "default_shared_enabled")]
    pub shared_enabled: bool,
    /// 同一用户模式至少出现多少次才写入预测层
    #[serde(default = "default_predictive_min_hits")]
    pub predictive_min_hits: usize,
}

fn default_local_capacity() -> usize {
    512
}

fn default_base_ttl_secs() -> u64 {
    30 * 60
}

fn default_min_ttl_secs() -> u64 {
    5 * 60
}

fn default_max_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_confidence_floor() -> f32 {
    0.5
}

fn default_durable_confidence() -> f32 {
    0.8
}

fn default_shared_enabled() -> bool {
    true
}

fn default_predictive_min_hits() -> usize {
    3
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            local_capacity: default_local_capacity(),
            base_ttl_secs: default_base_ttl_secs(),
            min_ttl_secs: default_min_ttl_secs(),
            max_ttl_secs: default_max_ttl_secs(),
            confidence_floor: default_confidence_floor(),
            durable_confidence: default_durable_confidence(),
            shared_enabled: default_shared_enabled(),
            predictive_min_hits: default_predictive_min_hits(),
        }
    }
}

/// [risk] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    /// 文化调整上限，超过 0.5 的配置会被截断
    #[serde(default = "default_max_cultural_adjustment")]
    pub max_cultural_adjustment: f32,
}

fn default_max_cultural_adjustment() -> f32 {
    0.5
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            max_cultural_adjustment: default_max_cultural_adjustment(),
        }
    }
}

/// [llm] 段：任务体使用的文本生成后端
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次 LLM 调用的上限（秒）；任务子超时通常更早触发
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 任务输出为结构化 JSON，使用较低的采样温度
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    400
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// [jobs] 段：宿主进程调度的维护任务周期（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct JobsSection {
    #[serde(default = "default_cache_warming_secs")]
    pub cache_warming_secs: u64,
    #[serde(default = "default_cache_purge_secs")]
    pub cache_purge_secs: u64,
    #[serde(default = "default_sla_trim_secs")]
    pub sla_trim_secs: u64,
}

fn default_cache_warming_secs() -> u64 {
    300
}

fn default_cache_purge_secs() -> u64 {
    60
}

fn default_sla_trim_secs() -> u64 {
    600
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            cache_warming_secs: default_cache_warming_secs(),
            cache_purge_secs: default_cache_purge_secs(),
            sla_trim_secs: default_sla_trim_secs(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 ATTUNE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ATTUNE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ATTUNE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.sla.deadlines.check_in_ms, 1500);
        assert_eq!(cfg.sla.deadlines.crisis_ms, 1800);
        assert_eq!(cfg.sla.history_capacity, 1000);
        assert_eq!(cfg.cache.min_ttl_secs, 300);
        assert_eq!(cfg.llm.provider, "mock");
    }

    #[test]
    fn test_clamps() {
        let planner = PlannerSection {
            fast_deadline_factor: 0.2,
        };
        assert_eq!(planner.fast_deadline_factor(), 0.6);

        let sla = SlaSection {
            safety_buffer_ms: 50,
            ..Default::default()
        };
        assert_eq!(sla.safety_buffer_ms(), 200);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[sla]\nsafety_buffer_ms = 400\n\n[sla.deadlines]\ndeep_support_ms = 6000\n\n[cache]\nlocal_capacity = 16"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.sla.safety_buffer_ms, 400);
        assert_eq!(cfg.sla.deadlines.deep_support_ms, 6000);
        assert_eq!(cfg.sla.deadlines.check_in_ms, 1500);
        assert_eq!(cfg.cache.local_capacity, 16);
        assert_eq!(cfg.cache.base_ttl_secs, 1800);
    }
}
