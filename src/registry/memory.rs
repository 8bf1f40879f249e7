//! 进程内注册中心
//!
//! 带版本号的内存存储，变更以原始载荷的形式广播给 watch。
//! 用于测试和单进程开发；[`MemoryRegistry::expire`] 可以模拟租约过期。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use super::lease::{LeaseRenewer, LeaseTable};
use super::snapshot::{AppsSnapshot, ChangeEvent};
use super::stream::{self, WatchPublisher, WatchStream};
use super::trait_def::Registry;
use super::{Listing, NotifyReceiver};
use crate::app::AppRecord;
use crate::error::{ErrorCode, NamingError, Result};

pub const DRIVER: &str = "memory";

/// 一次合并应用的最大事件数
pub const MAX_BATCH: usize = 64;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StoreEvent {
    service: String,
    change: ChangeEvent,
}

struct StoredEntry {
    payload: Vec<u8>,
    lease_id: i64,
}

#[derive(Default)]
struct Store {
    revision: u64,
    // service -> address -> entry
    services: HashMap<String, HashMap<String, StoredEntry>>,
}

struct Shared {
    store: RwLock<Store>,
    events: broadcast::Sender<StoreEvent>,
    next_lease: AtomicI64,
}

impl Shared {
    async fn put(&self, service: &str, address: &str, payload: Vec<u8>, lease_id: i64) -> u64 {
        let mut store = self.store.write().await;
        store.revision += 1;
        let revision = store.revision;
        store.services.entry(service.to_string()).or_default().insert(
            address.to_string(),
            StoredEntry {
                payload: payload.clone(),
                lease_id,
            },
        );
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(StoreEvent {
            service: service.to_string(),
            change: ChangeEvent::Put { payload, revision },
        });
        revision
    }

    async fn delete(&self, service: &str, address: &str) -> Option<u64> {
        let mut store = self.store.write().await;
        let entries = store.services.get_mut(service)?;
        let removed = entries.remove(address)?;
        if entries.is_empty() {
            store.services.remove(service);
        }
        store.revision += 1;
        let revision = store.revision;
        let _ = self.events.send(StoreEvent {
            service: service.to_string(),
            change: ChangeEvent::Delete {
                payload: removed.payload,
                revision,
            },
        });
        Some(revision)
    }

    async fn listing(&self, service: &str) -> Listing {
        let store = self.store.read().await;
        let apps = store
            .services
            .get(service)
            .map(|entries| {
                entries
                    .values()
                    .filter_map(|entry| match AppRecord::decode(&entry.payload) {
                        Ok(app) => Some(app),
                        Err(e) => {
                            warn!(service, error = %e, "Skipping undecodable stored record");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Listing::new(apps, store.revision)
    }
}

/// 进程内注册中心驱动
///
/// clone 之后共享同一个存储，可以让多个门面看到同一份注册数据。
#[derive(Clone)]
pub struct MemoryRegistry {
    shared: Arc<Shared>,
    leases: LeaseTable,
    ttl: Duration,
}

impl MemoryRegistry {
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                store: RwLock::new(Store::default()),
                events,
                next_lease: AtomicI64::new(1),
            }),
            leases: LeaseTable::new(),
            ttl,
        }
    }

    /// 模拟租约过期：删除记录但不停止续约，下一次续约会失败
    pub async fn expire(&self, app: &AppRecord) -> bool {
        self.shared.delete(app.name(), app.address()).await.is_some()
    }

    /// 直接写入原始载荷（不经过编码），不关联租约
    pub async fn put_raw(&self, service: &str, address: &str, payload: impl Into<Vec<u8>>) -> u64 {
        self.shared.put(service, address, payload.into(), 0).await
    }

    /// 当前存储版本
    pub async fn revision(&self) -> u64 {
        self.shared.store.read().await.revision
    }

    fn renew_interval(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_millis(1))
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

struct MemoryRenewer {
    shared: Arc<Shared>,
    service: String,
    address: String,
    lease_id: i64,
}

#[async_trait]
impl LeaseRenewer for MemoryRenewer {
    async fn renew(&mut self) -> Result<()> {
        let store = self.shared.store.read().await;
        let alive = store
            .services
            .get(&self.service)
            .and_then(|entries| entries.get(&self.address))
            .is_some_and(|entry| entry.lease_id == self.lease_id);
        if alive {
            Ok(())
        } else {
            Err(NamingError::backend(
                ErrorCode::LeaseExpired,
                format!("lease {} not found", self.lease_id),
            ))
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, app: &AppRecord) -> Result<NotifyReceiver> {
        let payload = app.encode()?;
        let lease_id = self.shared.next_lease.fetch_add(1, Ordering::Relaxed);

        let revision = self
            .shared
            .put(app.name(), app.address(), payload, lease_id)
            .await;

        let renewer = MemoryRenewer {
            shared: self.shared.clone(),
            service: app.name().to_string(),
            address: app.address().to_string(),
            lease_id,
        };
        let notify = self
            .leases
            .track(app.id(), lease_id, self.renew_interval(), renewer)
            .await;

        info!(app_id = %app.id(), lease_id, revision, "App registered");
        Ok(notify)
    }

    async fn deregister(&self, app: &AppRecord) -> Result<()> {
        // 先停止续约，通知原因才会是主动注销
        self.leases.release(app.id()).await;

        match self.shared.delete(app.name(), app.address()).await {
            Some(revision) => info!(app_id = %app.id(), revision, "App deregistered"),
            None => debug!(app_id = %app.id(), "App already absent"),
        }
        Ok(())
    }

    async fn discover(&self, name: &str) -> Result<Listing> {
        Ok(self.shared.listing(name).await)
    }

    async fn watch(&self, name: &str) -> Result<WatchStream> {
        // 先订阅再取基线，之间的变更由快照按版本去重
        let events = self.shared.events.subscribe();
        let baseline = self.shared.listing(name).await;

        let (publisher, stream) = stream::channel(name);
        let snapshot = AppsSnapshot::new(name, baseline);
        publisher.publish(snapshot.listing());

        tokio::spawn(pump(publisher, snapshot, events));
        Ok(stream)
    }
}

async fn pump(
    publisher: WatchPublisher,
    mut snapshot: AppsSnapshot,
    mut events: broadcast::Receiver<StoreEvent>,
) {
    loop {
        let first = tokio::select! {
            _ = publisher.closed() => {
                debug!(service = %publisher.service(), "Watch consumer gone, stopping pump");
                return;
            }
            received = events.recv() => received,
        };

        let mut batch = Vec::new();
        let mut failure = None;
        match first {
            Ok(event) => batch.push(event),
            Err(e) => failure = Some(e),
        }

        while failure.is_none() && batch.len() < MAX_BATCH {
            match events.try_recv() {
                Ok(event) => batch.push(event),
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    failure = Some(broadcast::error::RecvError::Lagged(n))
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    failure = Some(broadcast::error::RecvError::Closed)
                }
            }
        }

        if let Some(failure) = failure {
            let reason = match failure {
                broadcast::error::RecvError::Lagged(n) => {
                    format!("watch fell behind by {} events", n)
                }
                broadcast::error::RecvError::Closed => "registry closed".to_string(),
            };
            warn!(service = %publisher.service(), reason = %reason, "Watch canceled");
            publisher.cancel(NamingError::canceled(reason)).await;
            return;
        }

        let service = snapshot.service().to_string();
        let changes = batch
            .into_iter()
            .filter(|event| event.service == service)
            .map(|event| event.change);
        if snapshot.apply(changes) > 0 && !publisher.publish(snapshot.listing()) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{StopReason, WatchEvent};

    fn app(port: u16) -> AppRecord {
        AppRecord::new("user", "127.0.0.1", port)
    }

    fn sorted(mut apps: Vec<AppRecord>) -> Vec<AppRecord> {
        apps.sort_by(|a, b| a.address().cmp(b.address()));
        apps
    }

    async fn next_snapshot(stream: &mut WatchStream) -> Listing {
        match stream.next().await {
            Some(WatchEvent::Snapshot(listing)) => listing,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_and_discover() {
        let registry = MemoryRegistry::default();
        registry.register(&app(81)).await.unwrap();
        registry.register(&app(82)).await.unwrap();
        registry
            .register(&AppRecord::new("order", "127.0.0.1", 90))
            .await
            .unwrap();

        let listing = registry.discover("user").await.unwrap();
        assert_eq!(sorted(listing.apps), vec![app(81), app(82)]);
        assert_eq!(listing.revision, 3);
        assert!(registry.discover("payment").await.unwrap().apps.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let registry = MemoryRegistry::default();
        let notify = registry.register(&app(81)).await.unwrap();

        registry.deregister(&app(81)).await.unwrap();
        registry.deregister(&app(81)).await.unwrap();
        registry.deregister(&app(99)).await.unwrap();

        assert!(registry.discover("user").await.unwrap().apps.is_empty());
        assert_eq!(
            notify.await.unwrap().reason,
            StopReason::DeregisteredByCaller
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_reports_liveness_failure() {
        let registry = MemoryRegistry::new(Duration::from_secs(3));
        let notify = registry.register(&app(81)).await.unwrap();

        assert!(registry.expire(&app(81)).await);

        let message = notify.await.unwrap();
        assert_eq!(message.app_id, "user:127.0.0.1:81");
        assert_eq!(message.reason, StopReason::LivenessExtensionFailed);
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let registry = MemoryRegistry::default();
        registry.register(&app(81)).await.unwrap();
        registry.put_raw("user", "127.0.0.1:82", "{oops").await;

        let listing = registry.discover("user").await.unwrap();
        assert_eq!(listing.apps, vec![app(81)]);
    }

    #[tokio::test]
    async fn test_watch_follows_changes() {
        let registry = MemoryRegistry::default();
        registry.register(&app(81)).await.unwrap();

        let mut stream = registry.watch("user").await.unwrap();
        assert_eq!(next_snapshot(&mut stream).await.apps, vec![app(81)]);

        registry.register(&app(82)).await.unwrap();
        let mut latest = next_snapshot(&mut stream).await;
        while latest.apps.len() != 2 {
            latest = next_snapshot(&mut stream).await;
        }
        assert_eq!(sorted(latest.apps), vec![app(81), app(82)]);

        registry.deregister(&app(81)).await.unwrap();
        let mut latest = next_snapshot(&mut stream).await;
        while latest.apps.len() != 1 {
            latest = next_snapshot(&mut stream).await;
        }
        assert_eq!(latest.apps, vec![app(82)]);
    }

    #[tokio::test]
    async fn test_watch_skips_malformed_events_and_other_services() {
        let registry = MemoryRegistry::default();
        let mut stream = registry.watch("user").await.unwrap();
        assert!(next_snapshot(&mut stream).await.apps.is_empty());

        registry.put_raw("user", "127.0.0.1:82", "{oops").await;
        registry
            .register(&AppRecord::new("order", "127.0.0.1", 90))
            .await
            .unwrap();
        registry.register(&app(81)).await.unwrap();

        let latest = next_snapshot(&mut stream).await;
        assert_eq!(latest.apps, vec![app(81)]);
        assert_eq!(latest.revision, 3);
    }

    #[tokio::test]
    async fn test_dropping_registry_cancels_watch() {
        let registry = MemoryRegistry::default();
        let mut stream = registry.watch("user").await.unwrap();
        next_snapshot(&mut stream).await;

        drop(registry);

        assert!(matches!(
            stream.next().await,
            Some(WatchEvent::Canceled(NamingError::Canceled(_)))
        ));
        assert_eq!(stream.next().await, None);
    }
}
