//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};

use std::sync::Arc;

use crate::config::LlmSection;

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let provider = cfg.provider.to_lowercase();
    let has_key = std::env::var("OPENAI_API_KEY").is_ok();

    if provider == "openai" && (has_key || cfg.base_url.is_some()) {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.model);
        Arc::new(
            OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, None)
                .with_sampling(cfg.temperature, cfg.max_tokens),
        )
    } else {
        if provider != "mock" {
            tracing::warn!("No API key set or provider unknown, using Mock LLM");
        }
        Arc::new(MockLlmClient::new())
    }
}
