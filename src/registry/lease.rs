//! 租约续约
//!
//! 每个注册成功的实例对应一个后台续约任务。任务按固定间隔调用驱动提供的
//! [`LeaseRenewer`]，直到调用方注销或者后端不再确认续约，然后通过一次性通知
//! 告知调用方停止原因。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{NotifyMessage, NotifyReceiver, StopReason};
use crate::error::{ErrorCode, Result};

/// 连续失败达到该次数后放弃续约
pub const FAILURE_THRESHOLD: u32 = 3;

/// 驱动侧的一次续约动作
#[async_trait]
pub trait LeaseRenewer: Send + 'static {
    /// 续约一次
    ///
    /// 返回 `LeaseExpired` 表示租约已经不存在，立即放弃；其他错误累计到阈值后放弃。
    async fn renew(&mut self) -> Result<()>;
}

struct LeaseHandle {
    lease_id: i64,
    cancel: CancellationToken,
    generation: u64,
}

/// 实例 id → 租约
#[derive(Clone, Default)]
pub struct LeaseTable {
    leases: Arc<RwLock<HashMap<String, LeaseHandle>>>,
    generation: Arc<AtomicU64>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记租约并启动续约任务
    ///
    /// 同一实例重复登记时，旧的续约任务按主动注销结束。
    pub async fn track<R>(
        &self,
        app_id: &str,
        lease_id: i64,
        interval: Duration,
        renewer: R,
    ) -> NotifyReceiver
    where
        R: LeaseRenewer,
    {
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let mut leases = self.leases.write().await;
            let previous = leases.insert(
                app_id.to_string(),
                LeaseHandle {
                    lease_id,
                    cancel: cancel.clone(),
                    generation,
                },
            );
            if let Some(previous) = previous {
                previous.cancel.cancel();
            }
        }

        let leases = self.leases.clone();
        let app_id = app_id.to_string();
        tokio::spawn(async move {
            let reason = keep_alive(&app_id, interval, renewer, &cancel).await;

            if reason == StopReason::LivenessExtensionFailed {
                let mut leases = leases.write().await;
                if leases.get(&app_id).map(|h| h.generation) == Some(generation) {
                    leases.remove(&app_id);
                }
            }

            info!(app_id = %app_id, lease_id, reason = %reason, "Lease keep-alive stopped");
            let _ = tx.send(NotifyMessage { app_id, reason });
        });

        rx
    }

    /// 停止续约并移除租约，返回租约 id
    pub async fn release(&self, app_id: &str) -> Option<i64> {
        let handle = self.leases.write().await.remove(app_id)?;
        handle.cancel.cancel();
        Some(handle.lease_id)
    }

    pub async fn lease_id(&self, app_id: &str) -> Option<i64> {
        self.leases.read().await.get(app_id).map(|h| h.lease_id)
    }

    pub async fn contains(&self, app_id: &str) -> bool {
        self.leases.read().await.contains_key(app_id)
    }

    /// 停止全部续约任务
    pub async fn release_all(&self) {
        let mut leases = self.leases.write().await;
        for (_, handle) in leases.drain() {
            handle.cancel.cancel();
        }
    }
}

async fn keep_alive<R: LeaseRenewer>(
    app_id: &str,
    interval: Duration,
    mut renewer: R,
    cancel: &CancellationToken,
) -> StopReason {
    let mut ticker = tokio::time::interval(interval);
    // 第一次 tick 立即返回，注册时已经写入过
    ticker.tick().await;

    let mut failures = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return StopReason::DeregisteredByCaller,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return StopReason::DeregisteredByCaller,
            result = renewer.renew() => result,
        };

        match result {
            Ok(()) => {
                debug!(app_id, "Lease renewed");
                failures = 0;
            }
            Err(e) if e.code() == ErrorCode::LeaseExpired => {
                warn!(app_id, error = %e, "Lease no longer exists");
                return StopReason::LivenessExtensionFailed;
            }
            Err(e) => {
                failures += 1;
                warn!(app_id, failures, error = %e, "Lease renewal failed");
                if failures >= FAILURE_THRESHOLD {
                    return StopReason::LivenessExtensionFailed;
                }
            }
        }
    }
}
