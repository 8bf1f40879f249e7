//! 轮询负载均衡

use std::sync::atomic::{AtomicUsize, Ordering};

use super::Balancer;
use crate::app::AppRecord;
use crate::error::{NamingError, Result};

pub const DRIVER: &str = "round_robin";

/// 轮询（Round Robin）
///
/// 实例列表没有稳定顺序，轮询只保证长期近似均匀。
#[derive(Default)]
pub struct RoundRobinBalancer {
    index: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobinBalancer {
    fn pick(&self, apps: &[AppRecord]) -> Result<AppRecord> {
        if apps.is_empty() {
            return Err(NamingError::unavailable(""));
        }
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        Ok(apps[index % apps.len()].clone())
    }
}
