//! Sleep interval with random jitter

use rand::Rng;
use std::time::Duration;
use tracing::trace;

/// Base interval plus up to `jitter` percent of it, chosen at random
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    interval: Duration,
    jitter: u32,
}

impl Pacing {
    /// Create a pacing policy; jitter is clamped to 100 percent
    pub fn new(interval: Duration, jitter: u32) -> Self {
        Self {
            interval,
            jitter: jitter.min(100),
        }
    }

    /// Interval in whole seconds
    pub fn from_secs(secs: u64, jitter: u32) -> Self {
        Self::new(Duration::from_secs(secs), jitter)
    }

    /// No waiting at all
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, 0)
    }

    /// Base interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Jitter percentage
    pub fn jitter(&self) -> u32 {
        self.jitter
    }

    /// Pick the next delay in `[interval, interval * (1 + jitter%)]`
    pub fn next_delay(&self) -> Duration {
        let base = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        let spread = base.saturating_mul(u64::from(self.jitter)) / 100;
        if spread == 0 {
            return self.interval;
        }
        self.interval
            .saturating_add(Duration::from_millis(rand::thread_rng().gen_range(0..=spread)))
    }

    /// Sleep for the next delay
    pub async fn sleep(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        trace!("Sleeping for {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_no_jitter_is_exact() {
        let pacing = Pacing::from_secs(5, 0);
        assert_eq!(pacing.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_huge_interval_saturates() {
        let pacing = Pacing::new(Duration::from_secs(u64::MAX), 100);
        assert!(pacing.next_delay() >= pacing.interval());

        let pacing = Pacing::from_secs(u64::MAX / 1000, 100);
        assert!(pacing.next_delay() >= pacing.interval());
    }

    #[test]
    fn test_jitter_clamped() {
        assert_eq!(Pacing::from_secs(1, 250).jitter(), 100);
    }

    #[tokio::test]
    async fn test_immediate_does_not_block() {
        Pacing::immediate().sleep().await;
    }

    proptest! {
        #[test]
        fn test_delay_within_bounds(secs in 0u64..3600, jitter in 0u32..=100) {
            let pacing = Pacing::from_secs(secs, jitter);
            let delay = pacing.next_delay();
            let base = Duration::from_secs(secs);
            prop_assert!(delay >= base);
            prop_assert!(delay <= base + base * jitter / 100);
        }
    }
}
