//! 宿主进程调度的维护任务
//!
//! 引擎本身不启动任何后台循环；二进制入口通过 JobRunner 按配置周期运行这些任务，
//! 关闭信号到达时全部停止。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheHierarchy;
use crate::config::JobsSection;
use crate::sla::SlaMonitor;

/// 周期性维护任务
#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    /// 任务名称（用于日志）
    fn name(&self) -> &'static str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// 把重复出现的请求模式提升到预测层
pub struct CacheWarmingJob {
    cache: Arc<CacheHierarchy>,
}

impl CacheWarmingJob {
    pub fn new(cache: Arc<CacheHierarchy>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl MaintenanceJob for CacheWarmingJob {
    fn name(&self) -> &'static str {
        "cache_warming"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let warmed = self.cache.warm_predictive().await;
        tracing::debug!(warmed, "predictive tier warmed");
        Ok(())
    }
}

/// 清理本地层与共享层的过期条目
pub struct CachePurgeJob {
    cache: Arc<CacheHierarchy>,
}

impl CachePurgeJob {
    pub fn new(cache: Arc<CacheHierarchy>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl MaintenanceJob for CachePurgeJob {
    fn name(&self) -> &'static str {
        "cache_purge"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let purged = self.cache.purge_expired().await;
        tracing::debug!(purged, "expired cache entries purged");
        Ok(())
    }
}

/// 删除超出保留时长的 SLA 记录
pub struct SlaTrimJob {
    monitor: Arc<SlaMonitor>,
}

impl SlaTrimJob {
    pub fn new(monitor: Arc<SlaMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl MaintenanceJob for SlaTrimJob {
    fn name(&self) -> &'static str {
        "sla_trim"
    }

    async fn run(&self) -> anyhow::Result<()> {
        let trimmed = self.monitor.trim().await;
        tracing::debug!(trimmed, "old sla records trimmed");
        Ok(())
    }
}

/// 维护任务调度器
pub struct JobRunner {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl JobRunner {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            handles: Vec::new(),
        }
    }

    /// 注册缓存预热、缓存清理与 SLA 裁剪三个任务
    pub fn with_defaults(
        token: CancellationToken,
        cfg: &JobsSection,
        cache: Arc<CacheHierarchy>,
        monitor: Arc<SlaMonitor>,
    ) -> Self {
        let mut runner = Self::new(token);
        runner.spawn_every(
            Arc::new(CacheWarmingJob::new(cache.clone())),
            Duration::from_secs(cfg.cache_warming_secs.max(1)),
        );
        runner.spawn_every(
            Arc::new(CachePurgeJob::new(cache)),
            Duration::from_secs(cfg.cache_purge_secs.max(1)),
        );
        runner.spawn_every(
            Arc::new(SlaTrimJob::new(monitor)),
            Duration::from_secs(cfg.sla_trim_secs.max(1)),
        );
        runner
    }

    /// 每隔 period 运行一次（首次在一个周期之后），直到 token 被取消；单次失败只记录日志
    pub fn spawn_every(&mut self, job: Arc<dyn MaintenanceJob>, period: Duration) {
        let token = self.token.clone();
        self.handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!(job = job.name(), "job stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = job.run().await {
                            tracing::warn!(job = job.name(), error = %e, "maintenance job failed");
                        }
                    }
                }
            }
        }));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 取消并等待所有任务退出
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::{CacheSection, SlaSection};

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl MaintenanceJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("scripted failure");
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_each_period_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let mut runner = JobRunner::new(token.clone());
        runner.spawn_every(
            Arc::new(CountingJob {
                runs: runs.clone(),
                fail: true,
            }),
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(35)).await;
        // 失败不会停止调度
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        runner.shutdown().await;
        assert!(token.is_cancelled());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_default_jobs_run_directly() {
        let cache = Arc::new(CacheHierarchy::new(CacheSection::default(), None));
        let monitor = Arc::new(SlaMonitor::new(SlaSection::default()));

        CacheWarmingJob::new(cache.clone()).run().await.unwrap();
        CachePurgeJob::new(cache.clone()).run().await.unwrap();
        SlaTrimJob::new(monitor.clone()).run().await.unwrap();

        let runner = JobRunner::with_defaults(
            CancellationToken::new(),
            &JobsSection::default(),
            cache,
            monitor,
        );
        assert_eq!(runner.len(), 3);
        runner.shutdown().await;
    }
}
