//! Configuration for the sync engine and coordinator.

use rand::Rng;
use std::time::Duration;

/// Configuration for one [`crate::EntitySyncEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry policy for [`crate::EntitySyncEngine::force_sync`].
    pub retry: RetryConfig,
    /// Remote calls in flight at once within a phase.
    pub max_concurrent_requests: usize,
    /// Coalescing window for sync requests caused by local mutations.
    pub debounce_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_concurrent_requests: 3,
            debounce_window: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the concurrency limit. Zero is treated as one.
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit.max(1);
        self
    }

    /// Sets the debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Effective in-flight limit; a zero set through the public field
    /// counts as one.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_requests.max(1)
    }
}

/// Configuration for the [`crate::SyncCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Pause between two stores in one pass.
    pub inter_store_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            inter_store_delay: Duration::from_millis(100),
        }
    }
}

impl CoordinatorConfig {
    /// Sets the inter-store delay.
    pub fn with_inter_store_delay(mut self, delay: Duration) -> Self {
        self.inter_store_delay = delay;
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the delay before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Relative jitter applied to each delay, e.g. `0.1` for ±10%.
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a configuration with `max_retries` retries and default
    /// delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.10,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the relative jitter (clamped to `0.0..=1.0`).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based). Zero for `retry == 0`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            Duration::from_secs_f64((capped * factor).max(0.0))
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
