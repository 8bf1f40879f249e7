//! 随机负载均衡

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Balancer;
use crate::app::AppRecord;
use crate::error::{NamingError, Result};

pub const DRIVER: &str = "random";

/// 均匀随机选择，随机数生成器在构造时播种一次
pub struct RandomBalancer {
    rng: Mutex<StdRng>,
}

impl RandomBalancer {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// 使用固定种子（测试用）
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for RandomBalancer {
    fn pick(&self, apps: &[AppRecord]) -> Result<AppRecord> {
        if apps.is_empty() {
            return Err(NamingError::unavailable(""));
        }

        let index = match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0..apps.len()),
            // 锁中毒时状态仍然可用
            Err(poisoned) => poisoned.into_inner().gen_range(0..apps.len()),
        };

        Ok(apps[index].clone())
    }
}
