//! 插件注册表
//!
//! 负载均衡策略和注册中心驱动都按名字注册构造器。
//! 注册表是显式对象，在进程启动时构造一次并注入门面，没有全局可变状态。

use std::collections::HashMap;

use crate::balancer::BalancerRegistry;
use crate::error::{NamingError, Result};
use crate::registry::RegistryFactory;

/// 门面构造时使用的全部插件
pub struct Plugins {
    pub registries: RegistryFactory,
    pub balancers: BalancerRegistry,
}

impl Plugins {
    /// 空的插件集合，需要自行声明驱动和策略
    pub fn new() -> Self {
        Self {
            registries: RegistryFactory::new(),
            balancers: BalancerRegistry::new(),
        }
    }

    /// 声明全部内置驱动和负载均衡策略
    pub fn with_builtins() -> Result<Self> {
        Ok(Self {
            registries: RegistryFactory::with_builtins()?,
            balancers: BalancerRegistry::with_builtins()?,
        })
    }
}

impl Default for Plugins {
    fn default() -> Self {
        Self::new()
    }
}

/// 按名字索引的构造器注册表
pub struct PluginRegistry<F> {
    kind: &'static str,
    factories: HashMap<String, F>,
}

impl<F> PluginRegistry<F> {
    /// `kind` 只用于错误信息，例如 "balancer"、"registry"
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: HashMap::new(),
        }
    }

    /// 注册构造器；同名重复注册是配置错误
    pub fn declare(&mut self, name: impl Into<String>, factory: F) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(NamingError::configuration(format!(
                "{} `{}` declared twice",
                self.kind, name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// 查找构造器；未注册的名字是配置错误
    pub fn obtain(&self, name: &str) -> Result<&F> {
        self.factories.get(name).ok_or_else(|| {
            NamingError::configuration(format!("{} `{}` is not available", self.kind, name))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 已注册的名字（排序后返回）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
