//! 重试策略模块
//!
//! 注册、注销以及 watch 重连共用同一套指数退避：
//! 失败后延迟按倍数增长并封顶，成功后回到最小值。

pub mod backoff;
pub mod exponential;

pub use backoff::Backoff;
pub use exponential::ExponentialBackoffPolicy;

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{NamingError, Result};

/// 重试策略 trait
pub trait RetryPolicy {
    fn should_retry(&self, attempt: usize, error: &NamingError) -> bool;
    fn backoff_duration(&self, attempt: usize) -> Duration;
    fn max_attempts(&self) -> usize;
}

/// 按策略重试异步操作
///
/// `attempt` 从 1 开始计数。策略拒绝重试或次数耗尽时返回最后一次的错误。
/// 每次调用都从第一次尝试开始，上一次调用的退避不会带到下一次。
pub async fn retry<P, F, Fut, T>(policy: &P, operation: &str, mut f: F) -> Result<T>
where
    P: RetryPolicy + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.backoff_duration(attempt - 1);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
