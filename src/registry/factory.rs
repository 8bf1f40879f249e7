//! 注册中心驱动工厂
//!
//! 按 [`Config::driver`] 选择驱动并异步构造（驱动构造时需要连接后端）。

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;

use super::memory::{self, MemoryRegistry};
use super::trait_def::Registry;
use crate::config::Config;
use crate::error::Result;
use crate::plugin::PluginRegistry;

/// 驱动构造器
pub type RegistryConstructor =
    Arc<dyn Fn(Config) -> BoxFuture<'static, Result<Arc<dyn Registry>>> + Send + Sync>;

/// 注册中心驱动注册表
pub struct RegistryFactory {
    plugins: PluginRegistry<RegistryConstructor>,
}

impl RegistryFactory {
    pub fn new() -> Self {
        Self {
            plugins: PluginRegistry::new("registry"),
        }
    }

    /// 注册内置驱动：`memory`，以及按 feature 启用的 `etcd`、`consul`
    pub fn with_builtins() -> Result<Self> {
        let mut factory = Self::new();

        factory.declare(memory::DRIVER, connect_memory)?;
        #[cfg(feature = "etcd")]
        factory.declare(super::etcd::DRIVER, connect_etcd)?;
        #[cfg(feature = "consul")]
        factory.declare(super::consul::DRIVER, connect_consul)?;

        Ok(factory)
    }

    /// 注册驱动构造器；重名是配置错误
    pub fn declare<F, Fut>(&mut self, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(Config) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Registry>>> + Send + 'static,
    {
        let constructor: RegistryConstructor = Arc::new(move |config| constructor(config).boxed());
        self.plugins.declare(name, constructor)
    }

    /// 按配置中的驱动名构造驱动
    pub async fn obtain(&self, config: &Config) -> Result<Arc<dyn Registry>> {
        let constructor = self.plugins.obtain(&config.driver)?.clone();
        let registry = constructor(config.clone()).await?;
        info!(driver = %config.driver, servers = ?config.servers, "Registry driver ready");
        Ok(registry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.names()
    }
}

async fn connect_memory(config: Config) -> Result<Arc<dyn Registry>> {
    Ok(Arc::new(MemoryRegistry::new(config.options.ttl())))
}

#[cfg(feature = "etcd")]
async fn connect_etcd(config: Config) -> Result<Arc<dyn Registry>> {
    Ok(Arc::new(super::etcd::EtcdRegistry::new(&config).await?))
}

#[cfg(feature = "consul")]
async fn connect_consul(config: Config) -> Result<Arc<dyn Registry>> {
    Ok(Arc::new(super::consul::ConsulRegistry::new(&config)?))
}

impl Default for RegistryFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppRecord;
    use crate::error::NamingError;

    #[tokio::test]
    async fn test_builtin_memory_driver() {
        let factory = RegistryFactory::with_builtins().unwrap();
        assert!(factory.contains("memory"));

        let config = Config::new("memory", vec![]);
        let registry = factory.obtain(&config).await.unwrap();

        registry
            .register(&AppRecord::new("user", "127.0.0.1", 81))
            .await
            .unwrap();
        assert_eq!(registry.discover("user").await.unwrap().apps.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_driver_is_configuration_error() {
        let factory = RegistryFactory::with_builtins().unwrap();
        let config = Config::new("zookeeper", vec!["127.0.0.1:2181".to_string()]);

        let err = factory.obtain(&config).await.err().unwrap();
        assert_eq!(
            err,
            NamingError::configuration("registry `zookeeper` is not available")
        );
    }

    #[test]
    fn test_duplicate_driver_is_configuration_error() {
        let mut factory = RegistryFactory::with_builtins().unwrap();
        let err = factory.declare("memory", connect_memory).unwrap_err();
        assert!(matches!(err, NamingError::Configuration(_)));
    }

    #[cfg(feature = "etcd")]
    #[tokio::test]
    async fn test_etcd_requires_servers() {
        let factory = RegistryFactory::with_builtins().unwrap();
        let err = factory
            .obtain(&Config::new("etcd", vec![]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, NamingError::Configuration(_)));
    }
}
