//! 负载均衡模块
//!
//! 从一个服务的实例列表中选出一个实例。策略按名字注册到 [`BalancerRegistry`]，
//! 门面只依赖 [`Balancer`] trait。

pub mod random;
pub mod round_robin;

pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

use std::sync::Arc;

use crate::app::AppRecord;
use crate::error::Result;
use crate::plugin::PluginRegistry;

/// 负载均衡策略 trait
///
/// 输入列表没有顺序保证，实现不能依赖顺序。
pub trait Balancer: Send + Sync {
    /// 选出一个实例；列表为空时返回 `Unavailable`
    fn pick(&self, apps: &[AppRecord]) -> Result<AppRecord>;
}

/// 负载均衡策略构造器
pub type BalancerConstructor = Arc<dyn Fn() -> Arc<dyn Balancer> + Send + Sync>;

/// 负载均衡策略注册表
pub struct BalancerRegistry {
    plugins: PluginRegistry<BalancerConstructor>,
}

impl BalancerRegistry {
    pub fn new() -> Self {
        Self {
            plugins: PluginRegistry::new("balancer"),
        }
    }

    /// 注册内置策略：`random`、`round_robin`
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        registry.declare(random::DRIVER, || -> Arc<dyn Balancer> {
            Arc::new(RandomBalancer::new())
        })?;
        registry.declare(round_robin::DRIVER, || -> Arc<dyn Balancer> {
            Arc::new(RoundRobinBalancer::new())
        })?;
        Ok(registry)
    }

    pub fn declare<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Arc<dyn Balancer> + Send + Sync + 'static,
    {
        self.plugins.declare(name, Arc::new(factory))
    }

    pub fn obtain(&self, name: &str) -> Result<Arc<dyn Balancer>> {
        let factory = self.plugins.obtain(name)?;
        Ok(factory())
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.names()
    }
}

impl Default for BalancerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
