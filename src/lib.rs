//! Attune - 自适应编排引擎
//!
//! 模块划分：
//! - **api**: 请求 / 响应类型与用户偏好
//! - **agents**: 任务体边界（输入包、强类型 payload）与基于 LLM 的任务体
//! - **cache**: 三级缓存（本地 LRU / 共享存储 / 预测层）与自适应 TTL
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 调度、降级阶梯、合成、编排器与优雅关闭
//! - **jobs**: 宿主进程周期运行的维护任务
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 初始化
//! - **risk**: 风险评分器与短语词表
//! - **sla**: 时延预算监控、预测与合规统计
//! - **workflow**: 计划类型、依赖图、复杂度分类与计划器

pub mod agents;
pub mod api;
pub mod cache;
pub mod config;
pub mod core;
pub mod jobs;
pub mod llm;
pub mod observability;
pub mod risk;
pub mod sla;
pub mod workflow;

pub use api::{Request, Response};
pub use core::Orchestrator;
