//! Consul 注册中心驱动
//!
//! 通过 Consul HTTP API 注册实例，使用 TTL 健康检查 `service:{id}` 维持存活。
//! watch 使用阻塞查询，每次应答都是完整的健康实例列表，版本号取 `X-Consul-Index`。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::lease::{LeaseRenewer, LeaseTable};
use super::stream::{self, WatchPublisher, WatchStream};
use super::trait_def::Registry;
use super::{Listing, NotifyReceiver};
use crate::app::AppRecord;
use crate::config::Config;
use crate::error::{ErrorCode, NamingError, Result};
use crate::retry::Backoff;

pub const DRIVER: &str = "consul";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const BLOCKING_WAIT: &str = "30s";
const BLOCKING_TIMEOUT: Duration = Duration::from_secs(40);
/// 阻塞查询连续失败达到该次数后取消 watch
const MAX_WATCH_FAILURES: u32 = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    #[serde(default)]
    node: NodeEntry,
    service: ServiceEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeEntry {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

impl HealthEntry {
    fn into_app(self) -> AppRecord {
        // 注册时没有填写地址的实例使用节点地址
        let host = if self.service.address.is_empty() {
            self.node.address
        } else {
            self.service.address
        };
        AppRecord::new(self.service.service, host, self.service.port)
            .with_metadata(self.service.meta.unwrap_or_default())
    }
}

/// Consul HTTP API 的最小封装
#[derive(Clone)]
struct ConsulApi {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl ConsulApi {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.put(self.url(path)).timeout(REQUEST_TIMEOUT);
        self.authorize(builder)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }

    async fn health(&self, name: &str, index: Option<u64>) -> Result<Listing> {
        let mut request = self
            .http
            .get(self.url(&format!("/v1/health/service/{}", name)))
            .query(&[("passing", "true")]);
        request = match index {
            Some(index) => request
                .query(&[("index", index.to_string().as_str()), ("wait", BLOCKING_WAIT)])
                .timeout(BLOCKING_TIMEOUT),
            None => request.timeout(REQUEST_TIMEOUT),
        };

        let resp = checked(self.authorize(request).send().await?).await?;
        let revision = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let entries: Vec<HealthEntry> = resp.json().await?;
        let apps = entries.into_iter().map(HealthEntry::into_app).collect();
        Ok(Listing::new(apps, revision))
    }
}

/// 非 2xx 应答转换为后端错误
async fn checked(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let code = if status.is_server_error() {
        ErrorCode::ServiceUnavailable
    } else {
        ErrorCode::RequestRejected
    };
    Err(NamingError::backend(
        code,
        format!("consul answered {}: {}", status, body.trim()),
    ))
}

fn normalize_server(server: &str) -> String {
    let server = server.trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("http://{}", server)
    }
}

fn check_id(app: &AppRecord) -> String {
    format!("service:{}", app.id())
}

/// Consul 注册中心驱动
pub struct ConsulRegistry {
    api: ConsulApi,
    ttl: Duration,
    backoff_min: Duration,
    backoff_max: Duration,
    leases: LeaseTable,
}

impl ConsulRegistry {
    /// 使用第一个服务器地址；密码非空时作为 ACL token 发送
    pub fn new(config: &Config) -> Result<Self> {
        let servers = config.require_servers()?;
        let http = HttpClient::builder()
            .build()
            .map_err(|e| NamingError::configuration(format!("consul http client: {}", e)))?;

        let token = (!config.password.is_empty()).then(|| config.password.clone());
        let base_url = normalize_server(&servers[0]);
        info!(server = %base_url, "Using consul agent");

        Ok(Self {
            api: ConsulApi {
                http,
                base_url,
                token,
            },
            ttl: config.options.ttl().max(Duration::from_secs(1)),
            backoff_min: config.options.backoff_min(),
            backoff_max: config.options.backoff_max(),
            leases: LeaseTable::new(),
        })
    }

    fn renew_interval(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_millis(500))
    }

    fn registration(&self, app: &AppRecord) -> serde_json::Value {
        // Consul 允许的最小值是 1 分钟
        let deregister_after = (self.ttl * 3).max(Duration::from_secs(60));
        serde_json::json!({
            "ID": app.id(),
            "Name": app.name(),
            "Address": app.host(),
            "Port": app.port(),
            "Meta": app.metadata(),
            "Check": {
                "CheckID": check_id(app),
                "TTL": format!("{}s", self.ttl.as_secs()),
                "DeregisterCriticalServiceAfter": format!("{}s", deregister_after.as_secs()),
            }
        })
    }
}

struct ConsulRenewer {
    api: ConsulApi,
    check_id: String,
}

async fn pass_check(api: &ConsulApi, check_id: &str) -> Result<()> {
    let resp = api
        .put(&format!("/v1/agent/check/pass/{}", check_id))
        .send()
        .await?;
    if resp.status() == StatusCode::NOT_FOUND {
        return Err(NamingError::backend(
            ErrorCode::LeaseExpired,
            format!("check {} not found", check_id),
        ));
    }
    checked(resp).await?;
    Ok(())
}

#[async_trait]
impl LeaseRenewer for ConsulRenewer {
    async fn renew(&mut self) -> Result<()> {
        pass_check(&self.api, &self.check_id).await
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn register(&self, app: &AppRecord) -> Result<NotifyReceiver> {
        let resp = self
            .api
            .put("/v1/agent/service/register")
            .json(&self.registration(app))
            .send()
            .await?;
        checked(resp).await?;

        // TTL 检查初始状态为 critical，立即置为 passing
        let check_id = check_id(app);
        pass_check(&self.api, &check_id).await?;

        let renewer = ConsulRenewer {
            api: self.api.clone(),
            check_id,
        };
        let notify = self
            .leases
            .track(app.id(), 0, self.renew_interval(), renewer)
            .await;

        info!(app_id = %app.id(), ttl_secs = self.ttl.as_secs(), "App registered in consul");
        Ok(notify)
    }

    async fn deregister(&self, app: &AppRecord) -> Result<()> {
        self.leases.release(app.id()).await;

        let resp = self
            .api
            .put(&format!("/v1/agent/service/deregister/{}", app.id()))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(app_id = %app.id(), "App already absent from consul");
            return Ok(());
        }
        checked(resp).await?;

        info!(app_id = %app.id(), "App deregistered from consul");
        Ok(())
    }

    async fn discover(&self, name: &str) -> Result<Listing> {
        self.api.health(name, None).await
    }

    async fn watch(&self, name: &str) -> Result<WatchStream> {
        let baseline = self.api.health(name, None).await?;

        let (publisher, stream) = stream::channel(name);
        let index = baseline.revision;
        publisher.publish(baseline);

        let backoff = Backoff::new(self.backoff_min, self.backoff_max);
        tokio::spawn(pump(self.api.clone(), publisher, index, backoff));
        Ok(stream)
    }
}

/// 根据阻塞查询应答推进索引，返回新的索引和需要发布的列表
///
/// - 没有 `X-Consul-Index` 的应答总是发布，索引保持为 0；
/// - 索引不变表示等待超时，不发布；
/// - 索引回退时重置为 0，并把该列表作为不带版本的列表发布。
fn next_index(index: u64, mut listing: Listing) -> (u64, Option<Listing>) {
    if listing.revision == 0 {
        return (0, Some(listing));
    }
    if listing.revision == index {
        return (index, None);
    }
    if listing.revision < index {
        listing.revision = 0;
        return (0, Some(listing));
    }
    (listing.revision, Some(listing))
}

async fn pump(api: ConsulApi, publisher: WatchPublisher, mut index: u64, mut backoff: Backoff) {
    let name = publisher.service().to_string();
    let mut failures = 0;

    loop {
        let result = tokio::select! {
            _ = publisher.closed() => {
                debug!(service = %name, "Watch consumer gone, stopping consul watch");
                return;
            }
            result = api.health(&name, Some(index)) => result,
        };

        let delay = match result {
            Ok(listing) => {
                failures = 0;
                let unversioned = listing.revision == 0;
                if !unversioned {
                    backoff.reset();
                }
                if !unversioned && listing.revision < index {
                    warn!(service = %name, index, new_index = listing.revision, "Consul index went backwards, resetting");
                }

                let (next, update) = next_index(index, listing);
                index = next;
                if let Some(listing) = update {
                    if !publisher.publish(listing) {
                        return;
                    }
                }

                // 没有索引的查询不会阻塞，放慢轮询
                if !unversioned {
                    continue;
                }
                let delay = backoff.duration();
                debug!(service = %name, delay_ms = delay.as_millis() as u64, "Consul answered without an index");
                delay
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_WATCH_FAILURES {
                    warn!(service = %name, failures, error = %e, "Consul watch giving up");
                    publisher.cancel(NamingError::canceled(e.to_string())).await;
                    return;
                }

                let delay = backoff.duration();
                warn!(service = %name, failures, delay_ms = delay.as_millis() as u64, error = %e, "Consul blocking query failed");
                if !publisher.error(e) {
                    return;
                }
                delay
            }
        };

        tokio::select! {
            _ = publisher.closed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
