//! 注册中心驱动 Trait 定义

use async_trait::async_trait;

use super::{Listing, NotifyReceiver, WatchStream};
use crate::app::AppRecord;
use crate::error::Result;

/// 注册中心驱动
///
/// 具体后端（etcd、Consul、内存）实现这四个操作，由 [`super::RegistryFactory`] 按名字选择。
#[async_trait]
pub trait Registry: Send + Sync {
    /// 注册实例，并在后台续约
    ///
    /// 返回的通知在续约永久停止时触发且只触发一次，携带停止原因。
    async fn register(&self, app: &AppRecord) -> Result<NotifyReceiver>;

    /// 注销实例
    ///
    /// 幂等：实例已经不存在时返回成功。
    async fn deregister(&self, app: &AppRecord) -> Result<()>;

    /// 一次性获取服务的当前实例列表
    async fn discover(&self, name: &str) -> Result<Listing>;

    /// 打开长连接订阅，持续推送该服务的权威实例列表
    async fn watch(&self, name: &str) -> Result<WatchStream>;
}
