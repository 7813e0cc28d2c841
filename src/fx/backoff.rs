use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub jitter_max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, jitter_max: Duration) -> Self {
        Self { base, jitter_max }
    }

    /// `base * 2^(attempt - 1) + jitter`, attempts counted from 1.
    pub fn delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);

        self.base.saturating_mul(1 << exp).saturating_add(jitter)
    }

    pub fn sample_jitter(&self) -> Duration {
        if self.jitter_max.is_zero() {
            return Duration::ZERO;
        }

        let nanos = self.jitter_max.as_nanos() as u64;

        Duration::from_nanos(rand::rng().random_range(0..nanos))
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay(attempt, self.sample_jitter())
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_millis(100))
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let backoff = Backoff::new(Duration::from_millis(200), Duration::ZERO);

        let delays: Vec<_> = (1..=4).map(|a| backoff.delay(a, Duration::ZERO)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1600),
            ]
        );
    }

    #[test]
    fn test_jitter_is_added() {
        let backoff = Backoff::default();

        assert_eq!(
            backoff.delay(2, Duration::from_millis(30)),
            Duration::from_millis(430)
        );
    }

    #[test]
    fn test_sampled_jitter_stays_in_range() {
        let backoff = Backoff::default();

        for _ in 0..100 {
            let jitter = backoff.sample_jitter();
            assert!(jitter < Duration::from_millis(100));
        }
    }

    #[test]
    fn test_large_attempts_saturate() {
        let backoff = Backoff::default();

        assert_eq!(backoff.delay(u32::MAX, Duration::ZERO), backoff.delay(32, Duration::ZERO));
    }

    #[test]
    fn test_zero_jitter_max() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::ZERO);

        assert_eq!(backoff.next_delay(1), Duration::from_millis(10));
    }
}
