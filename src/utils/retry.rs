use std::time::Duration;

/// 重试退避策略
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
    /// 线性退避
    Linear {
        initial: Duration,
        increment: Duration,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// 计算第 n 次重试的延迟
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                let delay = Duration::from_secs_f64(delay);
                std::cmp::min(delay, *max_delay)
            }
            RetryStrategy::Linear { initial, increment, max_delay } => {
                let delay = *initial + (*increment * attempt);
                std::cmp::min(delay, *max_delay)
            }
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Exponential {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// 重试策略。重试只由用户显式触发，这里只约束次数上限和派发前的退避延迟。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 退避策略
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 当前重试次数下是否还允许再试一次
    pub fn allows(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// 第 attempt 次重试派发前应等待的时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.strategy.get_delay(attempt)
    }
}
