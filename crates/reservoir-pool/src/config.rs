//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default capacity when none is configured.
pub const DEFAULT_MAX_ACTIVE: usize = 8;

/// Default eviction pass interval.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Floor applied to the eviction interval at runtime.
pub const MIN_EVICTION_INTERVAL: Duration = Duration::from_secs(1);

/// Default per-holder statement cache capacity.
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 32;

/// Waiter wake ordering when a resource is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// Wake the most recently arrived waiter first. Trades strict
    /// ordering for throughput; the default, matching the widely
    /// deployed unfair-lock behavior.
    #[default]
    Lifo,
    /// Wake waiters strictly in arrival order.
    Fifo,
}

/// How background resource creation is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateStrategy {
    /// A single long-lived worker blocks on the empty signal and creates
    /// one resource at a time.
    #[default]
    DedicatedLoop,
    /// Replenishment is expressed as discrete cancellable tasks, bounded
    /// by [`PoolConfig::max_create_task_count`]. Enables the
    /// direct-creation fast path for bursty demand.
    TaskScheduled,
}

/// Configuration for the resource pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Resources created synchronously at pool construction.
    pub initial_size: usize,

    /// Working-set floor the evictor and creator maintain.
    pub min_idle: usize,

    /// Maximum resources that may exist (borrowed + idle).
    pub max_active: usize,

    /// Default time a borrow waits before timing out. `None` waits
    /// indefinitely.
    pub max_wait: Option<Duration>,

    /// Maximum number of borrowers allowed to wait simultaneously.
    /// `None` is unbounded.
    pub max_wait_thread_count: Option<usize>,

    /// Interval between eviction passes. Clamped to at least
    /// [`MIN_EVICTION_INTERVAL`] at runtime.
    pub eviction_interval: Duration,

    /// Idle time after which a resource above `min_idle` is evictable.
    pub min_evictable_idle: Duration,

    /// Idle time after which a resource is evicted regardless of
    /// `min_idle`.
    pub max_evictable_idle: Duration,

    /// Maximum physical age of a resource. `None` disables the check.
    pub max_lifetime: Option<Duration>,

    /// Maximum borrows per physical resource before it is retired.
    /// `None` disables the check.
    pub max_uses_per_resource: Option<u64>,

    /// Whether idle resources nearing staleness are liveness-probed and
    /// retained instead of evicted.
    pub keep_alive: bool,

    /// Idle time after which a keep-alive probe is due. Must exceed
    /// `eviction_interval`.
    pub keep_alive_interval: Duration,

    /// Whether borrowed handles are tracked for leak detection.
    pub remove_abandoned: bool,

    /// Lease age after which an untracked handle is reclaimed.
    pub abandoned_timeout: Duration,

    /// Whether reclaimed handles log their acquisition backtrace.
    pub log_abandoned: bool,

    /// Whether waiting borrowers fail immediately while creation is in
    /// continuous-failure mode.
    pub fail_fast: bool,

    /// Times a timed-out borrow is retried while the pool is not full.
    pub retry_on_timeout_if_not_full: u32,

    /// Active-count ceiling enforced while fatal-error admission control
    /// is engaged. `None` disables admission control.
    pub on_fatal_error_max_active: Option<usize>,

    /// Waiter wake ordering.
    pub fairness: Fairness,

    /// Whether popped resources are probed before being handed out.
    pub test_on_borrow: bool,

    /// Whether returned resources are probed before re-entering the idle
    /// set.
    pub test_on_return: bool,

    /// Whether popped resources idle longer than `eviction_interval` are
    /// probed before being handed out. Ignored when `test_on_borrow` is
    /// set.
    pub test_while_idle: bool,

    /// Delegate the initial fill to the background creator instead of
    /// performing it synchronously in the constructor.
    pub async_init: bool,

    /// Background creation dispatch strategy.
    pub create_strategy: CreateStrategy,

    /// Consecutive creation failures tolerated before the pool flips
    /// into continuous-failure mode.
    pub connect_error_retry_attempts: u32,

    /// Delay between creation attempts once in continuous-failure mode.
    pub time_between_connect_errors: Duration,

    /// Maximum concurrently pending creation tasks under
    /// [`CreateStrategy::TaskScheduled`].
    pub max_create_task_count: usize,

    /// Per-holder statement cache capacity. Zero disables caching.
    pub statement_cache_size: usize,

    /// Transactions rolled back at recycle that ran longer than this are
    /// logged. `None` disables the log.
    pub slow_transaction_threshold: Option<Duration>,

    /// Interval between stats snapshots. `None` disables the reporter.
    pub stats_interval: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 0,
            min_idle: 0,
            max_active: DEFAULT_MAX_ACTIVE,
            max_wait: None,
            max_wait_thread_count: None,
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            min_evictable_idle: Duration::from_secs(30 * 60),
            max_evictable_idle: Duration::from_secs(7 * 60 * 60),
            max_lifetime: None,
            max_uses_per_resource: None,
            keep_alive: false,
            keep_alive_interval: Duration::from_secs(2 * 60),
            remove_abandoned: false,
            abandoned_timeout: Duration::from_secs(300),
            log_abandoned: false,
            fail_fast: false,
            retry_on_timeout_if_not_full: 0,
            on_fatal_error_max_active: None,
            fairness: Fairness::default(),
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: true,
            async_init: false,
            create_strategy: CreateStrategy::default(),
            connect_error_retry_attempts: 1,
            time_between_connect_errors: Duration::from_millis(500),
            max_create_task_count: 3,
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
            slow_transaction_threshold: Some(Duration::from_secs(10)),
            stats_interval: None,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of resources created at construction.
    #[must_use]
    pub fn initial_size(mut self, count: usize) -> Self {
        self.initial_size = count;
        self
    }

    /// Set the working-set floor.
    #[must_use]
    pub fn min_idle(mut self, count: usize) -> Self {
        self.min_idle = count;
        self
    }

    /// Set the capacity.
    #[must_use]
    pub fn max_active(mut self, count: usize) -> Self {
        self.max_active = count;
        self
    }

    /// Set the default borrow wait deadline.
    #[must_use]
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    /// Bound the number of simultaneously waiting borrowers.
    #[must_use]
    pub fn max_wait_thread_count(mut self, count: usize) -> Self {
        self.max_wait_thread_count = Some(count);
        self
    }

    /// Set the eviction pass interval.
    #[must_use]
    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Set the soft idle-eviction threshold.
    #[must_use]
    pub fn min_evictable_idle(mut self, idle: Duration) -> Self {
        self.min_evictable_idle = idle;
        self
    }

    /// Set the hard idle-eviction threshold.
    #[must_use]
    pub fn max_evictable_idle(mut self, idle: Duration) -> Self {
        self.max_evictable_idle = idle;
        self
    }

    /// Set the maximum physical lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Set the maximum borrows per physical resource.
    #[must_use]
    pub fn max_uses_per_resource(mut self, uses: u64) -> Self {
        self.max_uses_per_resource = Some(uses);
        self
    }

    /// Enable or disable keep-alive probing.
    #[must_use]
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    /// Set the keep-alive probe interval.
    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Enable leak detection with the given lease timeout.
    #[must_use]
    pub fn remove_abandoned(mut self, timeout: Duration) -> Self {
        self.remove_abandoned = true;
        self.abandoned_timeout = timeout;
        self
    }

    /// Enable or disable acquisition-backtrace logging for reclaimed
    /// handles.
    #[must_use]
    pub fn log_abandoned(mut self, enabled: bool) -> Self {
        self.log_abandoned = enabled;
        self
    }

    /// Enable or disable fail-fast borrows during continuous failure.
    #[must_use]
    pub fn fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    /// Set the not-full timeout retry count.
    #[must_use]
    pub fn retry_on_timeout_if_not_full(mut self, retries: u32) -> Self {
        self.retry_on_timeout_if_not_full = retries;
        self
    }

    /// Set the post-fatal-error active ceiling.
    #[must_use]
    pub fn on_fatal_error_max_active(mut self, ceiling: usize) -> Self {
        self.on_fatal_error_max_active = Some(ceiling);
        self
    }

    /// Set the waiter wake ordering.
    #[must_use]
    pub fn fairness(mut self, fairness: Fairness) -> Self {
        self.fairness = fairness;
        self
    }

    /// Enable or disable borrow-time probing.
    #[must_use]
    pub fn test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    /// Enable or disable return-time probing.
    #[must_use]
    pub fn test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    /// Enable or disable idle-threshold probing at borrow.
    #[must_use]
    pub fn test_while_idle(mut self, enabled: bool) -> Self {
        self.test_while_idle = enabled;
        self
    }

    /// Delegate the initial fill to the background creator.
    #[must_use]
    pub fn async_init(mut self, enabled: bool) -> Self {
        self.async_init = enabled;
        self
    }

    /// Set the background creation strategy.
    #[must_use]
    pub fn create_strategy(mut self, strategy: CreateStrategy) -> Self {
        self.create_strategy = strategy;
        self
    }

    /// Set the creation retry budget.
    #[must_use]
    pub fn connect_error_retry_attempts(mut self, attempts: u32) -> Self {
        self.connect_error_retry_attempts = attempts;
        self
    }

    /// Set the inter-error creation delay.
    #[must_use]
    pub fn time_between_connect_errors(mut self, delay: Duration) -> Self {
        self.time_between_connect_errors = delay;
        self
    }

    /// Bound the number of pending creation tasks.
    #[must_use]
    pub fn max_create_task_count(mut self, count: usize) -> Self {
        self.max_create_task_count = count;
        self
    }

    /// Set the per-holder statement cache capacity.
    #[must_use]
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Set the slow-transaction logging threshold.
    #[must_use]
    pub fn slow_transaction_threshold(mut self, threshold: Duration) -> Self {
        self.slow_transaction_threshold = Some(threshold);
        self
    }

    /// Enable the periodic stats reporter.
    #[must_use]
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Capacity`] when the configuration violates a
    /// capacity invariant.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_active == 0 {
            return Err(PoolError::Capacity(
                "max_active must be greater than 0".into(),
            ));
        }
        if self.min_idle > self.max_active {
            return Err(PoolError::Capacity(
                "min_idle cannot be greater than max_active".into(),
            ));
        }
        if self.initial_size > self.max_active {
            return Err(PoolError::Capacity(
                "initial_size cannot be greater than max_active".into(),
            ));
        }
        if self.keep_alive && self.keep_alive_interval <= self.eviction_interval {
            return Err(PoolError::Capacity(
                "keep_alive_interval must be greater than eviction_interval".into(),
            ));
        }
        if self.min_evictable_idle > self.max_evictable_idle {
            return Err(PoolError::Capacity(
                "min_evictable_idle cannot be greater than max_evictable_idle".into(),
            ));
        }
        if self.create_strategy == CreateStrategy::TaskScheduled && self.max_create_task_count == 0
        {
            return Err(PoolError::Capacity(
                "max_create_task_count must be greater than 0 for task-scheduled creation".into(),
            ));
        }
        Ok(())
    }
}
