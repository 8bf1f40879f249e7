//! 服务监听任务
//!
//! 每个被发现过的服务名对应两个后台任务：
//! - [`WatchSupervisor`]：打开 watch 流，把快照写入缓存；流被取消、关闭或打开失败时退避后重开；
//! - [`resync_loop`]：按固定周期全量拉取一次，不依赖 watch 的健康状况。
//!
//! 任务只持有驱动和缓存的句柄，不持有门面本身；门面被丢弃时由 [`WatchTasks`] 终止任务。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::NamingOptions;
use crate::container::Container;
use crate::registry::{Registry, WatchEvent};
use crate::retry::Backoff;

/// 单个服务名的 watch 监督者
pub struct WatchSupervisor {
    service: String,
    registry: Arc<dyn Registry>,
    container: Container,
    backoff: Backoff,
}

impl WatchSupervisor {
    pub fn new(
        service: impl Into<String>,
        registry: Arc<dyn Registry>,
        container: Container,
        backoff: Backoff,
    ) -> Self {
        Self {
            service: service.into(),
            registry,
            container,
            backoff,
        }
    }

    /// 一直运行，直到任务被终止
    pub async fn run(mut self) {
        loop {
            if self.watch_once().await {
                self.backoff.reset();
            }

            let delay = self.backoff.duration();
            debug!(
                service = %self.service,
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reopening watch after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// 打开一次 watch 并消费到结束；返回这一代是否推送过快照
    pub async fn watch_once(&self) -> bool {
        let mut stream = match self.registry.watch(&self.service).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(service = %self.service, error = %e, "Failed to open watch");
                return false;
            }
        };
        debug!(service = %self.service, "Watch opened");

        let mut delivered = false;
        while let Some(event) = stream.next().await {
            match event {
                WatchEvent::Snapshot(listing) => {
                    let count = listing.apps.len();
                    let revision = listing.revision;
                    if self.container.publish(&self.service, listing).await {
                        debug!(service = %self.service, count, revision, "Cache updated from watch");
                    } else {
                        debug!(service = %self.service, revision, "Discarded stale watch snapshot");
                    }
                    delivered = true;
                }
                WatchEvent::Error(e) => {
                    warn!(service = %self.service, error = %e, "Watch reported transient error");
                }
                WatchEvent::Canceled(e) => {
                    warn!(service = %self.service, error = %e, "Watch canceled");
                    return delivered;
                }
            }
        }

        info!(service = %self.service, "Watch stream closed");
        delivered
    }
}

/// 周期性全量重同步
pub async fn resync_loop(
    service: String,
    registry: Arc<dyn Registry>,
    container: Container,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // 第一次 tick 立即返回
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match registry.discover(&service).await {
            Ok(listing) => {
                let count = listing.apps.len();
                if container.publish(&service, listing).await {
                    debug!(service = %service, count, "Cache resynced");
                }
            }
            Err(e) => warn!(service = %service, error = %e, "Resync failed"),
        }
    }
}

/// 某个服务名的两个后台任务，丢弃时终止
pub struct WatchTasks {
    watch: JoinHandle<()>,
    resync: JoinHandle<()>,
}

impl WatchTasks {
    pub fn spawn(
        service: &str,
        registry: Arc<dyn Registry>,
        container: Container,
        options: &NamingOptions,
    ) -> Self {
        let backoff = Backoff::new(options.backoff_min(), options.backoff_max());
        let supervisor =
            WatchSupervisor::new(service, registry.clone(), container.clone(), backoff);

        Self {
            watch: tokio::spawn(supervisor.run()),
            resync: tokio::spawn(resync_loop(
                service.to_string(),
                registry,
                container,
                options.resync_interval(),
            )),
        }
    }

    /// 终止任务并等待它们退出，之后不会再写缓存
    pub async fn shutdown(&mut self) {
        self.watch.abort();
        self.resync.abort();
        let _ = (&mut self.watch).await;
        let _ = (&mut self.resync).await;
    }

    pub fn is_finished(&self) -> bool {
        self.watch.is_finished() && self.resync.is_finished()
    }
}

impl Drop for WatchTasks {
    fn drop(&mut self) {
        self.watch.abort();
        self.resync.abort();
    }
}
