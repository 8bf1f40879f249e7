//! 实例缓存
//!
//! 服务名 → 当前实例列表。调用方读取的唯一数据源；
//! 每次更新整体替换某个服务名的列表，读者不会看到部分更新。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::app::AppRecord;
use crate::registry::Listing;

#[derive(Debug, Clone, Default)]
struct Entry {
    apps: Arc<Vec<AppRecord>>,
    revision: u64,
}

/// 实例缓存（读多写少，读写锁）
#[derive(Debug, Clone, Default)]
pub struct Container {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// 无条件替换某个服务名的实例列表
    pub async fn set(&self, name: &str, apps: Vec<AppRecord>) {
        let mut entries = self.entries.write().await;
        let revision = entries.get(name).map(|e| e.revision).unwrap_or(0);
        entries.insert(
            name.to_string(),
            Entry {
                apps: Arc::new(apps),
                revision,
            },
        );
    }

    /// 发布一个带版本的列表
    ///
    /// 版本比已缓存的旧时丢弃并返回 `false`。版本为 0 表示后端不提供版本（或版本已重置），
    /// 总是生效，并清除已缓存的版本，之后的第一个带版本列表重新建立基线。
    pub async fn publish(&self, name: &str, listing: Listing) -> bool {
        let mut entries = self.entries.write().await;
        if let Some(current) = entries.get(name) {
            if listing.revision != 0 && listing.revision < current.revision {
                return false;
            }
        }
        entries.insert(
            name.to_string(),
            Entry {
                apps: Arc::new(listing.apps),
                revision: listing.revision,
            },
        );
        true
    }

    /// 当前实例列表；未知服务返回空列表
    pub async fn get(&self, name: &str) -> Vec<AppRecord> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .map(|e| e.apps.as_ref().clone())
            .unwrap_or_default()
    }

    /// 当前缓存的版本
    pub async fn revision(&self, name: &str) -> Option<u64> {
        self.entries.read().await.get(name).map(|e| e.revision)
    }

    pub async fn remove(&self, name: &str) {
        self.entries.write().await.remove(name);
    }
}
