//! 日志初始化
//!
//! 库内部只使用 `tracing` 宏输出日志；应用可以调用 [`init_logging`]
//! 安装一个默认的 `tracing-subscriber`，`RUST_LOG` 优先于传入的级别。

use tracing_subscriber::EnvFilter;

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// 安装全局 tracing subscriber
///
/// 已经安装过 subscriber 时返回错误，不会覆盖已有配置。
pub fn init_logging(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match format {
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e)),
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e)),
    }
}
