//! Attune - 自适应编排引擎
//!
//! 入口：加载配置、初始化日志、组装编排器与维护任务。
//! 命令行参数作为一条消息处理；没有参数时逐行读取 stdin（纯文本或 JSON 请求），
//! 每条响应以一行 JSON 写到 stdout。

use std::sync::Arc;

use anyhow::Context;
use attune::api::{InboundRequest, Request};
use attune::config::load_config;
use attune::core::{run_with_graceful_shutdown, ShutdownManager, ShutdownReason};
use attune::jobs::JobRunner;
use attune::Orchestrator;
use tokio::io::{AsyncBufReadExt, BufReader};

const CLI_USER: &str = "cli";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    attune::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let orchestrator = Arc::new(Orchestrator::with_llm(&cfg, None));

    let shutdown = Arc::new(ShutdownManager::new());
    let jobs = JobRunner::with_defaults(
        shutdown.token(),
        &cfg.jobs,
        orchestrator.cache().clone(),
        orchestrator.monitor().clone(),
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let response = orchestrator
            .handle(Request::new(args.join(" "), CLI_USER))
            .await;
        println!("{}", serde_json::to_string(&response)?);
        jobs.shutdown().await;
        return Ok(());
    }

    let app = {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = serve_stdin(&orchestrator).await {
                tracing::error!(error = %e, "stdin loop failed");
            }
            shutdown.shutdown(ShutdownReason::UserInitiated);
        }
    };

    run_with_graceful_shutdown(shutdown, app, || async move {
        jobs.shutdown().await;
        let stats = orchestrator.monitor().stats().await;
        let cache = orchestrator.cache().stats().await;
        tracing::info!(
            requests = stats.total,
            compliance_rate = stats.compliance_rate,
            cache_hit_rate = cache.hit_rate(),
            "shutdown complete"
        );
    })
    .await;

    Ok(())
}

/// 每行一条请求：以 `{` 开头按 JSON 请求解析，否则作为纯文本消息
async fn serve_stdin(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request = if line.starts_with('{') {
            match serde_json::from_str::<InboundRequest>(line) {
                Ok(inbound) => Request::from(inbound),
                Err(e) => {
                    tracing::warn!(error = %e, "invalid request line skipped");
                    continue;
                }
            }
        } else {
            Request::new(line, CLI_USER)
        };

        let response = orchestrator.handle(request).await;
        println!("{}", serde_json::to_string(&response)?);
    }
    Ok(())
}
