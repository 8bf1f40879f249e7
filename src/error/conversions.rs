//! 错误类型转换实现
//!
//! 将各后端客户端的错误映射为 [`NamingError`]

use super::{ErrorCode, NamingError};

impl From<serde_json::Error> for NamingError {
    fn from(err: serde_json::Error) -> Self {
        NamingError::codec(format!("json: {}", err))
    }
}

impl From<toml::de::Error> for NamingError {
    fn from(err: toml::de::Error) -> Self {
        NamingError::configuration(format!("toml: {}", err))
    }
}

#[cfg(feature = "etcd")]
impl From<etcd_client::Error> for NamingError {
    fn from(err: etcd_client::Error) -> Self {
        let code = match &err {
            etcd_client::Error::TransportError(_) | etcd_client::Error::IoError(_) => {
                ErrorCode::ConnectionFailed
            }
            etcd_client::Error::WatchError(_) => ErrorCode::WatchCanceled,
            etcd_client::Error::LeaseKeepAliveError(_) => ErrorCode::LeaseExpired,
            etcd_client::Error::InvalidArgs(_) | etcd_client::Error::InvalidUri(_) => {
                ErrorCode::ConfigurationError
            }
            _ => ErrorCode::ServiceUnavailable,
        };
        NamingError::backend(code, err.to_string())
    }
}

#[cfg(feature = "consul")]
impl From<reqwest::Error> for NamingError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::ConnectionTimeout
        } else if err.is_connect() {
            ErrorCode::ConnectionFailed
        } else if err.is_decode() {
            ErrorCode::DeserializationError
        } else if let Some(status) = err.status() {
            if status.is_server_error() {
                ErrorCode::ServiceUnavailable
            } else {
                ErrorCode::RequestRejected
            }
        } else {
            ErrorCode::UnknownError
        };
        NamingError::backend(code, err.to_string())
    }
}
