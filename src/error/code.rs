//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 连接相关错误
/// - 2000-2999: 注册中心相关错误
/// - 3000-3999: 序列化相关错误
/// - 4000-4999: 配置相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,

    // ============================================================
    // 注册中心相关错误 (2000-2999)
    // ============================================================
    ServiceUnavailable = 2000,
    LeaseExpired = 2001,
    WatchCanceled = 2002,
    RequestRejected = 2003,

    // ============================================================
    // 序列化相关错误 (3000-3999)
    // ============================================================
    SerializationError = 3000,
    DeserializationError = 3001,

    // ============================================================
    // 配置相关错误 (4000-4999)
    // ============================================================
    ConfigurationError = 4000,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    InternalError = 9000,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::LeaseExpired => "LEASE_EXPIRED",
            ErrorCode::WatchCanceled => "WATCH_CANCELED",
            ErrorCode::RequestRejected => "REQUEST_REJECTED",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Registry,
            3000..=3999 => ErrorCategory::Serialization,
            4000..=4999 => ErrorCategory::Configuration,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 配置错误和序列化错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionFailed
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionClosed
                | ErrorCode::ServiceUnavailable
                | ErrorCode::LeaseExpired
                | ErrorCode::WatchCanceled
                | ErrorCode::InternalError
                | ErrorCode::UnknownError
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Connection,
    Registry,
    Serialization,
    Configuration,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
            ErrorCategory::Configuration => write!(f, "CONFIGURATION"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
