use std::time::Duration;

/// Retry, backoff and freshness settings for the sync coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPolicy {
    /// Replay attempts before an operation is parked in the error state.
    pub max_attempts: u32,
    /// Delay after the first replay cycle that hit a transient failure.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Delay between replay cycles while everything succeeds.
    pub poll_interval: Duration,
    /// How long a write waits on the gateway before deferring to the queue.
    pub write_budget: Duration,
    /// Age after which a synced cache entry is refreshed on read.
    /// `None` keeps synced entries fresh indefinitely.
    pub stale_after: Option<Duration>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            poll_interval: Duration::from_secs(60),
            write_budget: Duration::from_secs(5),
            stale_after: None,
        }
    }
}

impl SyncPolicy {
    /// Delay before the next cycle after `consecutive_failures` failing
    /// cycles in a row: `base * 2^(n-1)`, capped at `backoff_max`.
    pub fn backoff(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.poll_interval;
        }
        let exponent = (consecutive_failures - 1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }

    pub(crate) fn stale_window(&self) -> Option<chrono::Duration> {
        self.stale_after
            .and_then(|d| chrono::Duration::from_std(d).ok())
    }
}
