//! etcd 注册中心驱动
//!
//! - key：`/naming/{name}/{host}_{port}`，value：实例记录的 JSON 编码
//! - 注册时申请 TTL 租约，key 绑定租约写入，每 `ttl/3` 续约一次
//! - watch 从基线版本 + 1 开始，带上删除前的旧值

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, Event, EventType, GetOptions, LeaseKeepAliveStream, LeaseKeeper,
    PutOptions, WatchOptions, Watcher,
};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::lease::{LeaseRenewer, LeaseTable};
use super::snapshot::{AppsSnapshot, ChangeEvent};
use super::stream::{self, WatchPublisher, WatchStream};
use super::trait_def::Registry;
use super::{Listing, NotifyReceiver};
use crate::app::AppRecord;
use crate::config::Config;
use crate::error::{ErrorCode, NamingError, Result};

pub const DRIVER: &str = "etcd";

const KEY_PREFIX: &str = "/naming";

fn service_prefix(name: &str) -> String {
    format!("{}/{}/", KEY_PREFIX, name)
}

fn app_key(app: &AppRecord) -> String {
    format!("{}{}_{}", service_prefix(app.name()), app.host(), app.port())
}

/// 从 key 的最后一段 `{host}_{port}` 还原地址
fn address_from_key(key: &[u8]) -> Option<String> {
    let key = std::str::from_utf8(key).ok()?;
    let (_, last) = key.rsplit_once('/')?;
    let (host, port) = last.rsplit_once('_')?;
    Some(format!("{}:{}", host, port))
}

/// etcd 注册中心驱动
pub struct EtcdRegistry {
    client: Client,
    ttl: i64,
    leases: LeaseTable,
}

impl EtcdRegistry {
    /// 连接 etcd；用户名非空时带上认证信息
    pub async fn new(config: &Config) -> Result<Self> {
        let servers = config.require_servers()?;

        let mut options = ConnectOptions::new()
            .with_connect_timeout(Duration::from_secs(5))
            .with_keep_alive(Duration::from_secs(10), Duration::from_secs(5));
        if !config.username.is_empty() {
            options = options.with_user(config.username.clone(), config.password.clone());
        }

        let client = Client::connect(servers, Some(options)).await?;
        info!(servers = ?servers, "Connected to etcd");

        Ok(Self {
            client,
            ttl: config.options.ttl_secs.max(1) as i64,
            leases: LeaseTable::new(),
        })
    }

    fn renew_interval(&self) -> Duration {
        Duration::from_secs((self.ttl / 3).max(1) as u64)
    }

    async fn fetch(&self, name: &str) -> Result<Listing> {
        let mut client = self.client.clone();
        let resp = client
            .get(service_prefix(name), Some(GetOptions::new().with_prefix()))
            .await?;

        let revision = resp.header().map(|h| h.revision()).unwrap_or(0).max(0) as u64;
        let apps = resp
            .kvs()
            .iter()
            .filter_map(|kv| match AppRecord::decode(kv.value()) {
                Ok(app) => Some(app),
                Err(e) => {
                    warn!(
                        service = name,
                        key = %String::from_utf8_lossy(kv.key()),
                        error = %e,
                        "Skipping undecodable etcd record"
                    );
                    None
                }
            })
            .collect();

        Ok(Listing::new(apps, revision))
    }
}

struct EtcdRenewer {
    client: Client,
    lease_id: i64,
    channel: Option<(LeaseKeeper, LeaseKeepAliveStream)>,
}

impl EtcdRenewer {
    async fn channel(&mut self) -> Result<&mut (LeaseKeeper, LeaseKeepAliveStream)> {
        if self.channel.is_none() {
            debug!(lease_id = self.lease_id, "Opening lease keep-alive channel");
            let channel = self.client.lease_keep_alive(self.lease_id).await?;
            self.channel = Some(channel);
        }
        self.channel
            .as_mut()
            .ok_or_else(|| NamingError::backend(ErrorCode::InternalError, "keep-alive channel missing"))
    }
}

#[async_trait]
impl LeaseRenewer for EtcdRenewer {
    async fn renew(&mut self) -> Result<()> {
        let lease_id = self.lease_id;
        let (keeper, responses) = self.channel().await?;

        let result = match keeper.keep_alive().await {
            Ok(()) => match responses.next().await {
                Some(Ok(resp)) if resp.ttl() > 0 => return Ok(()),
                Some(Ok(_)) => {
                    return Err(NamingError::backend(
                        ErrorCode::LeaseExpired,
                        format!("lease {} expired", lease_id),
                    ));
                }
                Some(Err(e)) => NamingError::from(e),
                None => NamingError::backend(ErrorCode::ConnectionClosed, "keep-alive stream closed"),
            },
            Err(e) => NamingError::from(e),
        };

        // 通道出错后下次续约重新打开
        self.channel = None;
        Err(result)
    }
}

#[async_trait]
impl Registry for EtcdRegistry {
    async fn register(&self, app: &AppRecord) -> Result<NotifyReceiver> {
        let key = app_key(app);
        let payload = app.encode()?;
        let mut client = self.client.clone();

        let lease_id = client.lease_grant(self.ttl, None).await?.id();

        let put = client
            .put(key.clone(), payload, Some(PutOptions::new().with_lease(lease_id)))
            .await;
        if let Err(e) = put {
            if let Err(revoke) = client.lease_revoke(lease_id).await {
                warn!(lease_id, error = %revoke, "Failed to revoke unused lease");
            }
            return Err(e.into());
        }

        let channel = match client.lease_keep_alive(lease_id).await {
            Ok(channel) => Some(channel),
            Err(e) => {
                // 续约任务会重新打开通道
                warn!(lease_id, error = %e, "Failed to open keep-alive channel");
                None
            }
        };

        let renewer = EtcdRenewer {
            client,
            lease_id,
            channel,
        };
        let notify = self
            .leases
            .track(app.id(), lease_id, self.renew_interval(), renewer)
            .await;

        info!(app_id = %app.id(), key = %key, lease_id, ttl = self.ttl, "App registered in etcd");
        Ok(notify)
    }

    async fn deregister(&self, app: &AppRecord) -> Result<()> {
        let key = app_key(app);
        let mut client = self.client.clone();

        let resp = client.get(key.clone(), None).await?;
        let tracked = self.leases.release(app.id()).await;

        let Some(kv) = resp.kvs().first() else {
            debug!(app_id = %app.id(), "App already absent from etcd");
            return Ok(());
        };
        let stored_lease = kv.lease();

        client.delete(key, None).await?;

        let lease_id = tracked.or((stored_lease != 0).then_some(stored_lease));
        if let Some(lease_id) = lease_id {
            if let Err(e) = client.lease_revoke(lease_id).await {
                warn!(lease_id, error = %e, "Failed to revoke lease");
            }
        }

        info!(app_id = %app.id(), "App deregistered from etcd");
        Ok(())
    }

    async fn discover(&self, name: &str) -> Result<Listing> {
        self.fetch(name).await
    }

    async fn watch(&self, name: &str) -> Result<WatchStream> {
        let baseline = self.fetch(name).await?;
        let options = WatchOptions::new()
            .with_prefix()
            .with_prev_key()
            .with_progress_notify()
            .with_start_revision(baseline.revision as i64 + 1);

        let mut client = self.client.clone();
        let (watcher, events) = client.watch(service_prefix(name), Some(options)).await?;
        debug!(service = name, start_revision = baseline.revision + 1, "etcd watch opened");

        let (publisher, stream) = stream::channel(name);
        let snapshot = AppsSnapshot::new(name, baseline);
        publisher.publish(snapshot.listing());

        tokio::spawn(pump(publisher, snapshot, watcher, events));
        Ok(stream)
    }
}

fn change_event(event: &Event) -> Option<ChangeEvent> {
    let kv = event.kv()?;
    let revision = kv.mod_revision().max(0) as u64;

    match event.event_type() {
        EventType::Put => Some(ChangeEvent::Put {
            payload: kv.value().to_vec(),
            revision,
        }),
        EventType::Delete => match event.prev_kv() {
            Some(prev) => Some(ChangeEvent::Delete {
                payload: prev.value().to_vec(),
                revision,
            }),
            None => address_from_key(kv.key())
                .map(|address| ChangeEvent::DeleteAddress { address, revision }),
        },
    }
}

async fn pump(
    publisher: WatchPublisher,
    mut snapshot: AppsSnapshot,
    mut watcher: Watcher,
    mut events: etcd_client::WatchStream,
) {
    loop {
        let message = tokio::select! {
            _ = publisher.closed() => {
                debug!(service = %publisher.service(), "Watch consumer gone, canceling etcd watch");
                let _ = watcher.cancel().await;
                return;
            }
            message = events.message() => message,
        };

        match message {
            Ok(Some(resp)) => {
                if resp.canceled() {
                    let reason = if resp.compact_revision() > 0 {
                        format!("compacted at revision {}", resp.compact_revision())
                    } else {
                        format!("canceled by server: {}", resp.cancel_reason())
                    };
                    warn!(service = %publisher.service(), reason = %reason, "etcd watch canceled");
                    publisher.cancel(NamingError::canceled(reason)).await;
                    return;
                }

                let changes: Vec<ChangeEvent> = resp.events().iter().filter_map(change_event).collect();
                if changes.is_empty() {
                    continue;
                }
                if snapshot.apply(changes) > 0 && !publisher.publish(snapshot.listing()) {
                    let _ = watcher.cancel().await;
                    return;
                }
            }
            Ok(None) => {
                publisher
                    .cancel(NamingError::canceled("etcd watch stream closed"))
                    .await;
                return;
            }
            Err(e) => {
                warn!(service = %publisher.service(), error = %e, "etcd watch error");
                if !publisher.error(e.into()) {
                    let _ = watcher.cancel().await;
                    return;
                }
            }
        }
    }
}
