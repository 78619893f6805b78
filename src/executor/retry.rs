use crate::models::pool_config::PoolConfig;
use backon::ExponentialBuilder;
use std::time::Duration;

/// Longest delay between two retries.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Bounded exponential backoff: `limit` retries, the first after `backoff`,
/// each later one twice as long, capped at five seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, backoff: Duration) -> Self {
        Self { limit, backoff }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.retry_limit, config.retry_backoff)
    }

    pub fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.backoff)
            .with_max_delay(MAX_BACKOFF.max(self.backoff))
            .with_max_times(self.limit as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_delay_doubles() {
        let delays: Vec<Duration> = RetryPolicy::new(3, Duration::from_millis(10))
            .builder()
            .build()
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(40)
            ]
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let delays: Vec<Duration> = RetryPolicy::new(20, Duration::from_secs(1))
            .builder()
            .build()
            .collect();
        assert_eq!(delays.len(), 20);
        assert_eq!(delays.last(), Some(&MAX_BACKOFF));
    }

    #[test]
    fn test_none_never_retries() {
        assert_eq!(RetryPolicy::none().builder().build().count(), 0);
    }
}
