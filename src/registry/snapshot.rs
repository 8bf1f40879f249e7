//! 实例快照与增量合并
//!
//! watch 打开时先全量拉取一次作为基线，之后按到达顺序应用增量事件：
//! Put 按地址覆盖，Delete 按地址删除。每批事件应用完后整体物化为 [`Listing`]。
//! 快照只属于一个服务名和一次 watch，重连时丢弃重建。

use std::collections::HashMap;

use tracing::warn;

use super::Listing;
use crate::app::AppRecord;
use crate::error::Result;

/// 一条增量事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// 新增或更新，载荷是实例记录的编码
    Put { payload: Vec<u8>, revision: u64 },
    /// 删除，载荷是被删除的实例记录的编码
    Delete { payload: Vec<u8>, revision: u64 },
    /// 删除，后端只给出了地址（例如没有携带旧值的删除事件）
    DeleteAddress { address: String, revision: u64 },
}

impl ChangeEvent {
    pub fn put(app: &AppRecord, revision: u64) -> Result<Self> {
        Ok(ChangeEvent::Put {
            payload: app.encode()?,
            revision,
        })
    }

    pub fn delete(app: &AppRecord, revision: u64) -> Result<Self> {
        Ok(ChangeEvent::Delete {
            payload: app.encode()?,
            revision,
        })
    }

    pub fn revision(&self) -> u64 {
        match self {
            ChangeEvent::Put { revision, .. }
            | ChangeEvent::Delete { revision, .. }
            | ChangeEvent::DeleteAddress { revision, .. } => *revision,
        }
    }
}

/// 单个服务名的地址索引快照
#[derive(Debug, Clone)]
pub struct AppsSnapshot {
    service: String,
    apps: HashMap<String, AppRecord>,
    baseline: u64,
    revision: u64,
}

impl AppsSnapshot {
    /// 以一次全量拉取为基线
    pub fn new(service: impl Into<String>, baseline: Listing) -> Self {
        let apps = baseline
            .apps
            .into_iter()
            .map(|app| (app.address().to_string(), app))
            .collect();

        Self {
            service: service.into(),
            apps,
            baseline: baseline.revision,
            revision: baseline.revision,
        }
    }

    pub fn put(&mut self, app: AppRecord) {
        self.apps.insert(app.address().to_string(), app);
    }

    pub fn delete(&mut self, address: &str) -> bool {
        self.apps.remove(address).is_some()
    }

    /// 按顺序应用一批事件，返回实际生效的事件数
    ///
    /// 不能解码的事件记录警告后跳过；版本不高于基线的事件已经包含在基线里，直接忽略。
    pub fn apply<I>(&mut self, events: I) -> usize
    where
        I: IntoIterator<Item = ChangeEvent>,
    {
        let mut applied = 0;

        for event in events {
            let revision = event.revision();
            if revision != 0 && revision <= self.baseline {
                continue;
            }

            match event {
                ChangeEvent::Put { payload, .. } => {
                    let Some(app) = self.decode(&payload, revision) else {
                        continue;
                    };
                    self.put(app);
                }
                ChangeEvent::Delete { payload, .. } => {
                    let Some(app) = self.decode(&payload, revision) else {
                        continue;
                    };
                    self.delete(app.address());
                }
                ChangeEvent::DeleteAddress { address, .. } => {
                    self.delete(&address);
                }
            }

            self.revision = self.revision.max(revision);
            applied += 1;
        }

        applied
    }

    fn decode(&self, payload: &[u8], revision: u64) -> Option<AppRecord> {
        match AppRecord::decode(payload) {
            Ok(app) if app.name() == self.service => Some(app),
            Ok(app) => {
                warn!(
                    service = %self.service,
                    revision,
                    other = %app.name(),
                    "Skipping watch event for another service"
                );
                None
            }
            Err(e) => {
                warn!(
                    service = %self.service,
                    revision,
                    error = %e,
                    "Skipping undecodable watch event"
                );
                None
            }
        }
    }

    /// 物化为实例列表（无顺序保证）
    pub fn listing(&self) -> Listing {
        Listing::new(self.apps.values().cloned().collect(), self.revision)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}
