use crate::BackoffConfig;
use backoff::backoff::Backoff as InnerBackoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use parking_lot::Mutex as SyncMutex;
use std::time::Duration;

/// Thin wrapper around [`ExponentialBackoff`] that provides light-weight
/// synchronization for interior mutability and convenience methods.
///
/// Every retried operation is expected to own its own [`Backoff`]: the
/// intervals grow with each call to [`next`](Backoff::next).
pub struct Backoff {
    inner: SyncMutex<ExponentialBackoff>,
}

impl Backoff {
    /// Builds a new [`Backoff`] based on the given [`BackoffConfig`].
    pub fn new(config: impl AsRef<BackoffConfig>) -> Self {
        let config = config.as_ref();
        let inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(config.initial_interval())
            .with_max_interval(config.max_interval())
            .with_randomization_factor(config.randomization_factor())
            .with_multiplier(config.multiplier())
            .with_max_elapsed_time(config.max_elapsed_time())
            .build();

        Self {
            inner: SyncMutex::new(inner),
        }
    }

    /// Returns the next backoff interval, or [`None`] if the max elapsed time
    /// has been exceeded.
    pub fn next(&self) -> Option<Duration> {
        self.inner.lock().next_backoff()
    }

    /// Sleeps for the next backoff interval. Only yields to the runtime if the
    /// max elapsed time has been exceeded.
    pub async fn sleep_next(&self) {
        let next_duration = self.next();

        if let Some(duration) = next_duration {
            tokio::time::sleep(duration).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    /// Resets this backoff to the initial interval.
    pub fn reset(&self) {
        self.inner.lock().reset();
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl From<BackoffConfig> for Backoff {
    fn from(config: BackoffConfig) -> Self {
        Self::new(config)
    }
}
