//! 服务注册发现门面
//!
//! [`Naming`] 组合注册中心驱动、负载均衡策略和实例缓存：
//! - 注册 / 注销带有限次数的指数退避重试；
//! - 第一次发现某个服务名时启动 watch 和周期重同步任务（每个服务名只启动一次）；
//! - 发现请求只读缓存，缓存为空时同步拉取一次预热。
//!
//! ```no_run
//! # async fn example() -> flare_naming::Result<()> {
//! use flare_naming::{AppRecord, Config, Naming, Plugins};
//!
//! let plugins = Plugins::with_builtins()?;
//! let config = Config::new("etcd", vec!["127.0.0.1:2379".to_string()]);
//! let naming = Naming::new(config, &plugins).await?;
//!
//! let _notify = naming.register(&AppRecord::new("user", "127.0.0.1", 81)).await?;
//! let app = naming.discover("user").await?;
//! println!("picked {}", app.address());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::AppRecord;
use crate::balancer::Balancer;
use crate::config::{Config, NamingOptions};
use crate::container::Container;
use crate::error::{NamingError, Result};
use crate::plugin::Plugins;
use crate::registry::{NotifyMessage, NotifyReceiver, Registry, StopReason};
use crate::retry::{Backoff, ExponentialBackoffPolicy, retry};
use crate::watcher::WatchTasks;

struct Inner {
    registry: Arc<dyn Registry>,
    balancer: Arc<dyn Balancer>,
    container: Container,
    options: NamingOptions,
    policy: ExponentialBackoffPolicy,
    // 已启动监听的服务名；丢弃时终止对应任务
    watched: RwLock<HashMap<String, WatchTasks>>,
}

/// 服务注册发现门面
///
/// clone 之后共享同一份缓存和监听任务；最后一个句柄被丢弃时终止全部后台任务。
#[derive(Clone)]
pub struct Naming {
    inner: Arc<Inner>,
}

impl Naming {
    /// 按配置从插件集合中选择驱动和负载均衡策略
    pub async fn new(config: Config, plugins: &Plugins) -> Result<Self> {
        config.validate()?;
        let balancer = plugins.balancers.obtain(&config.balancer)?;
        let registry = plugins.registries.obtain(&config).await?;

        info!(driver = %config.driver, balancer = %config.balancer, "Naming initialized");
        Ok(Self::with_parts(registry, balancer, config.options))
    }

    /// 直接注入驱动和负载均衡策略
    pub fn with_parts(
        registry: Arc<dyn Registry>,
        balancer: Arc<dyn Balancer>,
        options: NamingOptions,
    ) -> Self {
        let policy = ExponentialBackoffPolicy::new(
            options.retry_attempts,
            options.backoff_min(),
            options.backoff_max(),
        );

        Self {
            inner: Arc::new(Inner {
                registry,
                balancer,
                container: Container::new(),
                options,
                policy,
                watched: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// 注册实例
    ///
    /// 返回的通知在续约停止时触发一次；原因为 `LivenessExtensionFailed` 时调用方应重新注册。
    pub async fn register(&self, app: &AppRecord) -> Result<NotifyReceiver> {
        let registry = &self.inner.registry;
        let notify = retry(&self.inner.policy, "register", || registry.register(app)).await?;
        info!(app_id = %app.id(), "Registered");
        Ok(notify)
    }

    /// 注销实例；实例不存在时同样返回成功
    pub async fn deregister(&self, app: &AppRecord) -> Result<()> {
        let registry = &self.inner.registry;
        retry(&self.inner.policy, "deregister", || registry.deregister(app)).await?;
        info!(app_id = %app.id(), "Deregistered");
        Ok(())
    }

    /// 发现一个实例（由负载均衡策略选出）
    pub async fn discover(&self, name: &str) -> Result<AppRecord> {
        let apps = self.discover_all(name).await?;
        self.inner.balancer.pick(&apps).map_err(|e| {
            if e.is_unavailable() {
                NamingError::unavailable(name)
            } else {
                e
            }
        })
    }

    /// 发现服务的全部实例
    ///
    /// 第一次调用时启动监听；缓存为空时同步拉取一次。仍然为空时返回 `Unavailable`。
    pub async fn discover_all(&self, name: &str) -> Result<Vec<AppRecord>> {
        self.ensure_watched(name).await;

        let apps = self.inner.container.get(name).await;
        if !apps.is_empty() {
            return Ok(apps);
        }

        let listing = self.inner.registry.discover(name).await?;
        debug!(service = name, count = listing.apps.len(), revision = listing.revision, "Cache warmed");
        self.inner.container.publish(name, listing).await;

        let apps = self.inner.container.get(name).await;
        if apps.is_empty() {
            return Err(NamingError::unavailable(name));
        }
        Ok(apps)
    }

    /// 注册并在续约失败后自动重新注册，直到实例被主动注销
    ///
    /// 遇到不可重试的错误（例如配置错误）时任务结束。
    /// 返回的任务不随门面一起终止，需要调用方自行 `abort`。
    pub fn keep_registered(&self, app: AppRecord) -> JoinHandle<()> {
        let registry = self.inner.registry.clone();
        let policy = self.inner.policy.clone();
        let mut backoff = Backoff::new(self.inner.options.backoff_min(), self.inner.options.backoff_max());

        tokio::spawn(async move {
            loop {
                let notify = match retry(&policy, "register", || registry.register(&app)).await {
                    Ok(notify) => {
                        backoff.reset();
                        notify
                    }
                    Err(e) if !e.is_retryable() => {
                        warn!(app_id = %app.id(), error = %e, "Registration failed permanently, giving up");
                        return;
                    }
                    Err(e) => {
                        let delay = backoff.duration();
                        warn!(
                            app_id = %app.id(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Registration failed, trying again later"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };

                match notify.await {
                    Ok(NotifyMessage {
                        reason: StopReason::DeregisteredByCaller,
                        ..
                    }) => {
                        info!(app_id = %app.id(), "Registration ended by caller");
                        return;
                    }
                    Ok(message) => {
                        warn!(app_id = %message.app_id, reason = %message.reason, "Registration lost, registering again");
                    }
                    Err(_) => {
                        warn!(app_id = %app.id(), "Registration notifier dropped");
                        return;
                    }
                }
            }
        })
    }

    /// 停止监听某个服务名并清除其缓存
    ///
    /// 返回该服务名之前是否处于监听中。
    pub async fn forget(&self, name: &str) -> bool {
        let mut watched = self.inner.watched.write().await;
        let removed = watched.remove(name);
        let was_watched = match removed {
            Some(mut tasks) => {
                tasks.shutdown().await;
                true
            }
            None => false,
        };
        self.inner.container.remove(name).await;

        if was_watched {
            info!(service = name, "Stopped watching service");
        }
        was_watched
    }

    /// 是否已经启动对该服务名的监听
    pub async fn watched(&self, name: &str) -> bool {
        self.inner.watched.read().await.contains_key(name)
    }

    /// 缓存中的实例列表，不触发监听和拉取
    pub async fn cached(&self, name: &str) -> Vec<AppRecord> {
        self.inner.container.get(name).await
    }

    pub fn options(&self) -> &NamingOptions {
        &self.inner.options
    }

    async fn ensure_watched(&self, name: &str) {
        if self.inner.watched.read().await.contains_key(name) {
            return;
        }

        let mut watched = self.inner.watched.write().await;
        if watched.contains_key(name) {
            return;
        }

        let tasks = WatchTasks::spawn(
            name,
            self.inner.registry.clone(),
            self.inner.container.clone(),
            &self.inner.options,
        );
        watched.insert(name.to_string(), tasks);
        info!(service = name, "Started watching service");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::balancer::RandomBalancer;
    use crate::error::ErrorCode;
    use crate::registry::{Listing, MemoryRegistry, WatchStream};

    fn naming(registry: &MemoryRegistry) -> Naming {
        Naming::with_parts(
            Arc::new(registry.clone()),
            Arc::new(RandomBalancer::with_seed(1)),
            NamingOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_new_rejects_unknown_balancer() {
        let plugins = Plugins::with_builtins().unwrap();
        let config = Config::new("memory", vec![]).with_balancer("least_conn");

        let err = Naming::new(config, &plugins).await.err().unwrap();
        assert_eq!(
            err,
            NamingError::configuration("balancer `least_conn` is not available")
        );
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_options() {
        let plugins = Plugins::with_builtins().unwrap();
        let mut options = NamingOptions::default();
        options.ttl_secs = 0;
        let config = Config::new("memory", vec![]).with_options(options);

        assert!(matches!(
            Naming::new(config, &plugins).await,
            Err(NamingError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_discover_starts_watch_once() {
        let registry = MemoryRegistry::default();
        registry
            .register(&AppRecord::new("user", "127.0.0.1", 81))
            .await
            .unwrap();
        let naming = naming(&registry);

        assert!(!naming.watched("user").await);
        naming.discover("user").await.unwrap();
        naming.discover("user").await.unwrap();
        assert!(naming.watched("user").await);
        assert_eq!(naming.inner.watched.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_forget_clears_cache_and_tasks() {
        let registry = MemoryRegistry::default();
        registry
            .register(&AppRecord::new("user", "127.0.0.1", 81))
            .await
            .unwrap();
        let naming = naming(&registry);

        naming.discover_all("user").await.unwrap();
        assert!(naming.forget("user").await);
        assert!(!naming.watched("user").await);
        assert!(naming.cached("user").await.is_empty());
        assert!(!naming.forget("user").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_registered_recovers_from_expiry() {
        let registry = MemoryRegistry::new(std::time::Duration::from_secs(3));
        let naming = naming(&registry);
        let app = AppRecord::new("user", "127.0.0.1", 81);

        let handle = naming.keep_registered(app.clone());
        while registry.discover("user").await.unwrap().apps.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        registry.expire(&app).await;
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        assert_eq!(registry.discover("user").await.unwrap().apps, vec![app.clone()]);

        naming.deregister(&app).await.unwrap();
        handle.await.unwrap();
        assert!(registry.discover("user").await.unwrap().apps.is_empty());
    }

    /// 注册总是返回配置错误、拉取总是返回后端错误的驱动
    #[derive(Default)]
    struct BrokenRegistry {
        registers: AtomicU32,
        discovers: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Registry for BrokenRegistry {
        async fn register(&self, _app: &AppRecord) -> Result<NotifyReceiver> {
            self.registers.fetch_add(1, Ordering::SeqCst);
            Err(NamingError::configuration("namespace is not allowed"))
        }

        async fn deregister(&self, _app: &AppRecord) -> Result<()> {
            Ok(())
        }

        async fn discover(&self, _name: &str) -> Result<Listing> {
            self.discovers.fetch_add(1, Ordering::SeqCst);
            Err(NamingError::backend(ErrorCode::ServiceUnavailable, "leader changed"))
        }

        async fn watch(&self, name: &str) -> Result<WatchStream> {
            Err(NamingError::unavailable(name))
        }
    }

    fn broken_naming(registry: &Arc<BrokenRegistry>) -> Naming {
        Naming::with_parts(
            registry.clone(),
            Arc::new(RandomBalancer::with_seed(1)),
            NamingOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_registered_stops_on_configuration_error() {
        let registry = Arc::new(BrokenRegistry::default());
        let naming = broken_naming(&registry);

        let handle = naming.keep_registered(AppRecord::new("user", "127.0.0.1", 81));
        tokio::time::timeout(std::time::Duration::from_secs(600), handle)
            .await
            .expect("keep_registered kept retrying a configuration error")
            .unwrap();
        assert_eq!(registry.registers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cold_cache_warms_with_one_driver_call() {
        let registry = Arc::new(BrokenRegistry::default());
        let naming = broken_naming(&registry);

        let err = naming.discover_all("user").await.unwrap_err();
        assert_eq!(
            err,
            NamingError::backend(ErrorCode::ServiceUnavailable, "leader changed")
        );
        assert_eq!(registry.discovers.load(Ordering::SeqCst), 1);
    }
}
