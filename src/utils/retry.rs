use std::time::Duration;

/// 线性退避：第 n 次重试等待 increment * n，不超过 max_delay
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    pub increment: Duration,
    pub max_delay: Duration,
}

impl RetryStrategy {
    pub fn linear(increment: Duration, max_delay: Duration) -> Self {
        Self { increment, max_delay }
    }

    /// 计算第 n 次重试的延迟
    pub fn get_delay(&self, attempt: u32) -> Duration {
        self.increment
            .checked_mul(attempt)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// 可重试失败后的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待后重新尝试
    RetryAfter(Duration),
    /// 超过 max_retries
    GiveUp,
}

/// 按任务的 max_retries 决定是否继续
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self { strategy }
    }

    /// failures 为包含本次在内的连续失败次数
    pub fn decide(&self, failures: u32, max_retries: u32) -> RetryDecision {
        if failures > max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.strategy.get_delay(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delay_grows_linearly() {
        let strategy = RetryStrategy::linear(Duration::from_secs(10), Duration::from_secs(60));

        assert_eq!(strategy.get_delay(1), Duration::from_secs(10));
        assert_eq!(strategy.get_delay(2), Duration::from_secs(20));
        assert_eq!(strategy.get_delay(3), Duration::from_secs(30));
        assert_eq!(strategy.get_delay(7), Duration::from_secs(60));
        assert_eq!(strategy.get_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_policy_gives_up_after_max_retries() {
        let policy = RetryPolicy::new(RetryStrategy::linear(
            Duration::from_millis(100),
            Duration::from_secs(1),
        ));

        assert_eq!(policy.decide(1, 3), RetryDecision::RetryAfter(Duration::from_millis(100)));
        assert_eq!(policy.decide(3, 3), RetryDecision::RetryAfter(Duration::from_millis(300)));
        assert_eq!(policy.decide(4, 3), RetryDecision::GiveUp);
        assert_eq!(policy.decide(1, 0), RetryDecision::GiveUp);
    }
}
