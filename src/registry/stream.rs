//! watch 流
//!
//! 驱动内部的泵任务通过 [`WatchPublisher`] 推送，消费者从 [`WatchStream`] 读取。
//! 通道是有界的：
//! - 快照放在单值槽里，慢消费者只会看到最新的快照，旧快照被覆盖；
//! - 瞬时错误走容量为 [`SIGNAL_CAPACITY`] 的队列，队列满时丢弃并记录日志；
//! - 取消信号在生产者关闭前发送一次，消费者会先看到尚未读取的快照。

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::Listing;
use crate::error::NamingError;

pub const SIGNAL_CAPACITY: usize = 16;

/// watch 流推送的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// 新的权威实例列表
    Snapshot(Listing),
    /// 瞬时错误，继续消费
    Error(NamingError),
    /// 终止状态，需要重新打开 watch
    Canceled(NamingError),
}

enum Signal {
    Error(NamingError),
    Canceled(NamingError),
}

/// 创建一对生产者 / 消费者
pub fn channel(service: &str) -> (WatchPublisher, WatchStream) {
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);

    (
        WatchPublisher {
            service: service.to_string(),
            snapshots: snapshot_tx,
            signals: signal_tx,
        },
        WatchStream {
            service: service.to_string(),
            snapshots: snapshot_rx,
            signals: signal_rx,
            snapshots_open: true,
            signals_open: true,
            finished: false,
        },
    )
}

/// watch 流生产端
pub struct WatchPublisher {
    service: String,
    snapshots: watch::Sender<Option<Listing>>,
    signals: mpsc::Sender<Signal>,
}

impl WatchPublisher {
    /// 推送快照；消费者已关闭时返回 `false`
    pub fn publish(&self, listing: Listing) -> bool {
        self.snapshots.send(Some(listing)).is_ok()
    }

    /// 推送瞬时错误；消费者已关闭时返回 `false`
    pub fn error(&self, err: NamingError) -> bool {
        match self.signals.try_send(Signal::Error(err)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(service = %self.service, "Watch signal queue full, dropping transient error");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// 发送取消信号并关闭生产端
    pub async fn cancel(self, err: NamingError) {
        let _ = self.signals.send(Signal::Canceled(err)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.snapshots.is_closed()
    }

    /// 消费者被丢弃时完成
    pub async fn closed(&self) {
        self.snapshots.closed().await
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

/// watch 流消费端
pub struct WatchStream {
    service: String,
    snapshots: watch::Receiver<Option<Listing>>,
    signals: mpsc::Receiver<Signal>,
    snapshots_open: bool,
    signals_open: bool,
    finished: bool,
}

impl WatchStream {
    /// 读取下一个事件；返回 `None` 表示流已关闭
    pub async fn next(&mut self) -> Option<WatchEvent> {
        loop {
            if self.finished || (!self.snapshots_open && !self.signals_open) {
                return None;
            }

            tokio::select! {
                biased;

                changed = self.snapshots.changed(), if self.snapshots_open => match changed {
                    Ok(()) => {
                        if let Some(listing) = self.snapshots.borrow_and_update().clone() {
                            return Some(WatchEvent::Snapshot(listing));
                        }
                    }
                    Err(_) => self.snapshots_open = false,
                },

                signal = self.signals.recv(), if self.signals_open => match signal {
                    Some(Signal::Error(err)) => return Some(WatchEvent::Error(err)),
                    Some(Signal::Canceled(err)) => {
                        self.finished = true;
                        return Some(WatchEvent::Canceled(err));
                    }
                    None => self.signals_open = false,
                },
            }
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}
