//! 服务注册发现模块
//!
//! 支持多种注册中心后端：etcd、Consul 和进程内存储

#[cfg(feature = "consul")]
pub mod consul;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod factory;
pub mod lease;
pub mod memory;
pub mod snapshot;
pub mod stream;
pub mod trait_def;

#[cfg(feature = "consul")]
pub use consul::ConsulRegistry;
#[cfg(feature = "etcd")]
pub use etcd::EtcdRegistry;
pub use factory::{RegistryConstructor, RegistryFactory};
pub use lease::{LeaseRenewer, LeaseTable};
pub use memory::MemoryRegistry;
pub use snapshot::{AppsSnapshot, ChangeEvent};
pub use stream::{WatchEvent, WatchPublisher, WatchStream};
pub use trait_def::Registry;

use std::fmt;

use tokio::sync::oneshot;

use crate::app::AppRecord;

/// 某个服务名的一次权威枚举
///
/// `revision` 为后端的单调版本号（etcd revision、Consul index、内存存储计数器），
/// 0 表示后端不提供版本。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub apps: Vec<AppRecord>,
    pub revision: u64,
}

impl Listing {
    pub fn new(apps: Vec<AppRecord>, revision: u64) -> Self {
        Self { apps, revision }
    }
}

/// 续约停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 调用方主动注销，不是错误
    DeregisteredByCaller,
    /// 后端不再确认续约，调用方应重新注册
    LivenessExtensionFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::DeregisteredByCaller => write!(f, "deregistered by caller"),
            StopReason::LivenessExtensionFailed => write!(f, "liveness extension failed"),
        }
    }
}

/// 注册失效通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyMessage {
    pub app_id: String,
    pub reason: StopReason,
}

/// 注册失效通知接收端（只触发一次）
pub type NotifyReceiver = oneshot::Receiver<NotifyMessage>;
