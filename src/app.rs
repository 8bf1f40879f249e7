//! 服务实例记录
//!
//! [`AppRecord`] 标识某个服务的一个运行实例。构造后不可变，
//! 序列化后的 JSON 文本就是写入注册中心的载荷。

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NamingError, Result};

/// 服务实例记录
///
/// - `id` = `{name}:{host}:{port}`
/// - `address` = `{host}:{port}`
///
/// 缓存与快照按 `address` 识别实例（同一服务名内），而不是整条记录，
/// 元数据变化不会改变实例身份。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    host: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    port: u16,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    address: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

impl AppRecord {
    /// 创建新的实例记录（元数据为空）
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        let host = host.into();
        Self {
            id: format!("{}:{}:{}", name, host, port),
            address: format!("{}:{}", host, port),
            name,
            host,
            port,
            metadata: HashMap::new(),
        }
    }

    /// 设置元数据
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// 添加单个元数据项
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// 编码为注册中心存储的载荷
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(NamingError::from)
    }

    /// 从注册中心载荷解码
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(NamingError::from)
    }
}

impl fmt::Display for AppRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}", self.id),
        }
    }
}
