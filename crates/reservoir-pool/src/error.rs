//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Pool has been shut down.
    #[error("pool is closed")]
    Closed,

    /// Pool is administratively disabled.
    #[error("pool is disabled: {}", cause.as_deref().unwrap_or("no cause recorded"))]
    Disabled {
        /// The disable cause, if one was recorded.
        cause: Option<String>,
    },

    /// Deadline exceeded while waiting for a resource.
    ///
    /// Carries a diagnostic snapshot of the pool at the moment the wait
    /// gave up, so callers can tell saturation from a stalled creator.
    #[error(
        "borrow timed out after {}ms: active {active}, max_active {max_active}, \
         idle {idle}, creating {creating}, last create error: {}",
        wait.as_millis(),
        last_create_error.as_deref().unwrap_or("none")
    )]
    Timeout {
        /// Time spent waiting before giving up.
        wait: Duration,
        /// Borrowed-and-not-returned count at timeout.
        active: usize,
        /// Configured capacity.
        max_active: usize,
        /// Idle count at timeout.
        idle: usize,
        /// In-flight creation attempts (direct or background).
        creating: usize,
        /// Message of the most recent creation failure, if any.
        last_create_error: Option<String>,
    },

    /// The factory failed to open a resource.
    #[error("failed to create resource: {0}")]
    Creation(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Creation has failed repeatedly and fail-fast is enabled.
    #[error(
        "resource creation failing continuously: {}",
        last.as_deref().unwrap_or("no error recorded")
    )]
    ContinuousFailure {
        /// Message of the most recent creation failure.
        last: Option<String>,
    },

    /// Configuration violates capacity invariants.
    #[error("pool configuration error: {0}")]
    Capacity(String),

    /// Too many borrowers are already waiting.
    #[error("wait queue full (max {max} waiting borrowers)")]
    WaitQueueFull {
        /// Configured maximum number of waiting borrowers.
        max: usize,
    },

    /// Fatal-error admission control is engaged and the active count has
    /// reached the post-fatal-error ceiling.
    #[error("admission denied after fatal errors: active {active}, ceiling {ceiling}")]
    AdmissionDenied {
        /// Borrowed-and-not-returned count at rejection.
        active: usize,
        /// Configured post-fatal-error active ceiling.
        ceiling: usize,
    },

    /// A borrow was rejected by an interceptor.
    #[error("borrow rejected: {0}")]
    Rejected(String),

    /// Operation on a handle that was already closed or disabled.
    #[error("handle is no longer usable")]
    StaleHandle,
}

impl PoolError {
    /// Whether retrying the borrow later could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::WaitQueueFull { .. }
                | Self::AdmissionDenied { .. }
                | Self::Creation(_)
        )
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
