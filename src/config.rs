use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{NamingError, Result};

/// 服务发现配置
///
/// `driver`、`servers`、`username`、`password` 原样交给所选驱动的构造函数；
/// `options` 控制门面层的重试、重同步和租约行为。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_driver")]
    pub driver: String, // etcd, consul, memory
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_balancer")]
    pub balancer: String,
    #[serde(default)]
    pub options: NamingOptions,
}

fn default_driver() -> String {
    "etcd".to_string()
}

fn default_balancer() -> String {
    "random".to_string()
}

/// 门面层调优参数
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NamingOptions {
    /// 注册租约 TTL（秒）
    pub ttl_secs: u64,
    /// 周期性全量重同步间隔（秒）
    pub resync_interval_secs: u64,
    /// 注册 / 注销最多尝试次数
    pub retry_attempts: usize,
    /// 退避最小值（毫秒）
    pub backoff_min_ms: u64,
    /// 退避上限（毫秒）
    pub backoff_max_ms: u64,
}

impl Default for NamingOptions {
    fn default() -> Self {
        Self {
            ttl_secs: 10,
            resync_interval_secs: 60,
            retry_attempts: 3,
            backoff_min_ms: 100,
            backoff_max_ms: 10_000,
        }
    }
}

impl NamingOptions {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn backoff_min(&self) -> Duration {
        Duration::from_millis(self.backoff_min_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Config {
    /// 使用指定驱动和服务器列表创建配置，其余字段取默认值
    pub fn new(driver: impl Into<String>, servers: Vec<String>) -> Self {
        Self {
            driver: driver.into(),
            servers,
            username: String::new(),
            password: String::new(),
            balancer: default_balancer(),
            options: NamingOptions::default(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_balancer(mut self, balancer: impl Into<String>) -> Self {
        self.balancer = balancer.into();
        self
    }

    pub fn with_options(mut self, options: NamingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path, e))?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 需要网络后端的驱动调用：`servers` 不能为空
    pub fn require_servers(&self) -> Result<&[String]> {
        if self.servers.is_empty() {
            return Err(NamingError::configuration(format!(
                "driver `{}` requires at least one server",
                self.driver
            )));
        }
        Ok(&self.servers)
    }

    /// 校验调优参数
    pub fn validate(&self) -> Result<()> {
        if self.options.ttl_secs == 0 {
            return Err(NamingError::configuration("options.ttl_secs must be positive"));
        }
        if self.options.resync_interval_secs == 0 {
            return Err(NamingError::configuration(
                "options.resync_interval_secs must be positive",
            ));
        }
        if self.options.backoff_min_ms > self.options.backoff_max_ms {
            return Err(NamingError::configuration(
                "options.backoff_min_ms must not exceed options.backoff_max_ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(
            r#"
            driver = "consul"
            servers = ["10.72.137.14:8500"]
            password = "my-token"
            balancer = "round_robin"

            [options]
            ttl_secs = 15
            resync_interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.driver, "consul");
        assert_eq!(config.servers, vec!["10.72.137.14:8500".to_string()]);
        assert_eq!(config.username, "");
        assert_eq!(config.password, "my-token");
        assert_eq!(config.balancer, "round_robin");
        assert_eq!(config.options.ttl(), Duration::from_secs(15));
        assert_eq!(config.options.resync_interval(), Duration::from_secs(30));
        assert_eq!(config.options.retry_attempts, 3);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str(r#"servers = ["http://127.0.0.1:2379"]"#).unwrap();

        assert_eq!(config.driver, "etcd");
        assert_eq!(config.balancer, "random");
        assert_eq!(config.options, NamingOptions::default());
    }

    #[test]
    fn test_invalid_options_are_configuration_errors() {
        let err = Config::from_toml_str(
            r#"
            [options]
            backoff_min_ms = 5000
            backoff_max_ms = 100
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, NamingError::Configuration(_)));
    }

    #[test]
    fn test_require_servers() {
        let config = Config::new("etcd", vec![]);
        assert!(config.require_servers().is_err());

        let config = Config::new("etcd", vec!["127.0.0.1:2379".to_string()]);
        assert_eq!(config.require_servers().unwrap().len(), 1);
    }
}
