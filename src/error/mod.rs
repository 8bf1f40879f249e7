//! 错误处理模块
//!
//! 统一的服务发现错误类型。`Unavailable` 是合法的稳态（当前没有已知实例），
//! 不是传输错误；后端错误携带 [`ErrorCode`]，由重试策略据此判断是否重试。

pub mod code;
pub mod conversions;

pub use code::{ErrorCategory, ErrorCode};

use thiserror::Error;

/// 服务发现统一错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// 当前没有该服务的可用实例
    #[error("no instances available for service `{0}`")]
    Unavailable(String),

    /// 注册中心后端错误（网络抖动、请求失败等）
    #[error("registry error [{code}]: {message}", code = .code.as_str())]
    Backend { code: ErrorCode, message: String },

    /// 配置错误（未知驱动、重复注册插件等），不可重试
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 实例记录编解码错误
    #[error("codec error: {0}")]
    Codec(String),

    /// watch 流被取消（终止状态，调用方需要重新打开）
    #[error("watch canceled: {0}")]
    Canceled(String),
}

impl NamingError {
    /// 创建后端错误
    pub fn backend(code: ErrorCode, message: impl Into<String>) -> Self {
        NamingError::Backend {
            code,
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn configuration(message: impl Into<String>) -> Self {
        NamingError::Configuration(message.into())
    }

    /// 创建编解码错误
    pub fn codec(message: impl Into<String>) -> Self {
        NamingError::Codec(message.into())
    }

    /// 创建 watch 取消错误
    pub fn canceled(message: impl Into<String>) -> Self {
        NamingError::Canceled(message.into())
    }

    pub fn unavailable(service: impl Into<String>) -> Self {
        NamingError::Unavailable(service.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            NamingError::Unavailable(_) => ErrorCode::ServiceUnavailable,
            NamingError::Backend { code, .. } => *code,
            NamingError::Configuration(_) => ErrorCode::ConfigurationError,
            NamingError::Codec(_) => ErrorCode::DeserializationError,
            NamingError::Canceled(_) => ErrorCode::WatchCanceled,
        }
    }

    /// 判断是否可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            NamingError::Backend { code, .. } => code.is_retryable(),
            NamingError::Canceled(_) => true,
            _ => false,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, NamingError::Unavailable(_))
    }
}

/// 服务发现结果类型
pub type Result<T> = std::result::Result<T, NamingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = NamingError::backend(ErrorCode::ConnectionTimeout, "etcd did not answer");
        assert_eq!(
            err.to_string(),
            "registry error [CONNECTION_TIMEOUT]: etcd did not answer"
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(NamingError::backend(ErrorCode::ConnectionFailed, "x").is_retryable());
        assert!(NamingError::canceled("compacted").is_retryable());
        assert!(!NamingError::configuration("unknown driver").is_retryable());
        assert!(!NamingError::unavailable("user").is_retryable());
        assert!(NamingError::unavailable("user").is_unavailable());
    }
}
