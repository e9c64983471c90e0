//! Pipeline configuration.
//!
//! One config object covers the construction surface of every engine
//! component. Components also validate their own parameters at
//! construction; [`PipelineConfig::validate`] runs the same checks up
//! front so a misconfigured pipeline fails before anything is spawned.

use std::time::Duration;

use crate::error::ConfigError;
use crate::pool::FailurePolicy;

/// Default queue capacity between stages.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default maximum items per batch.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Default batch window before a partial batch is flushed.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Default admissions per rate window.
pub const DEFAULT_RATE_LIMIT: usize = 100;

/// Default rolling rate window.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Default worker count per pool stage.
pub const DEFAULT_WORKER_COUNT: usize = 8;

/// Default cap on total frontier admissions.
pub const DEFAULT_MAX_KEYS: usize = 10_000;

/// Construction parameters for a complete pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of inter-stage queues (0 = unbounded).
    pub capacity: usize,
    /// Maximum items per emitted batch.
    pub batch_size: usize,
    /// Window bounding how long a batch may accumulate.
    pub batch_timeout: Duration,
    /// Maximum admissions per rate window.
    pub rate_limit: usize,
    /// Length of the rolling rate window.
    pub rate_window: Duration,
    /// Workers per pool stage.
    pub worker_count: usize,
    /// Cap on total frontier admissions.
    pub max_keys: usize,
    /// What to do with items whose handler fails.
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: DEFAULT_RATE_WINDOW,
            worker_count: DEFAULT_WORKER_COUNT,
            max_keys: DEFAULT_MAX_KEYS,
            failure_policy: FailurePolicy::Drop,
        }
    }
}

impl PipelineConfig {
    /// Sets the inter-stage queue capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the batch size and window.
    pub fn with_batching(mut self, batch_size: usize, batch_timeout: Duration) -> Self {
        self.batch_size = batch_size;
        self.batch_timeout = batch_timeout;
        self
    }

    /// Sets the rate limit and window.
    pub fn with_rate(mut self, rate_limit: usize, rate_window: Duration) -> Self {
        self.rate_limit = rate_limit;
        self.rate_window = rate_window;
        self
    }

    /// Sets the worker count per pool stage.
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Sets the frontier admission cap.
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    /// Sets the per-item failure policy.
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Checks every positivity rule the component constructors enforce.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found, in component order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit == 0 {
            return Err(ConfigError::ZeroRateLimit);
        }
        if self.rate_window.is_zero() {
            return Err(ConfigError::ZeroRateWindow);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.batch_timeout.is_zero() {
            return Err(ConfigError::ZeroBatchTimeout);
        }
        if self.worker_count == 0 {
            return Err(ConfigError::ZeroWorkerCount);
        }
        if self.max_keys == 0 {
            return Err(ConfigError::ZeroMaxKeys);
        }
        Ok(())
    }
}
