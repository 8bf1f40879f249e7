//! 有状态的指数退避

use std::time::Duration;

/// 指数退避计时器
///
/// 每次调用 [`Backoff::duration`] 返回当前延迟并把下一次延迟翻倍，
/// 直到达到上限；[`Backoff::reset`] 回到最小值。
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            attempt: 0,
        }
    }

    /// 返回本次应等待的时长，并推进到下一次
    pub fn duration(&mut self) -> Duration {
        let delay = Self::delay_for(self.min, self.max, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// 回到最小延迟
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// 已连续退避的次数
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 第 `attempt` 次（从 0 开始）的延迟：`min * 2^attempt`，不超过 `max`
    pub fn delay_for(min: Duration, max: Duration, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        min.checked_mul(factor).unwrap_or(max).min(max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(10))
    }
}
