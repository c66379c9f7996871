//! # reservoir-pool
//!
//! A managed pool of expensive, long-lived resources shared by many
//! concurrent callers.
//!
//! The pool hands out a ready-to-use resource quickly, reclaims it
//! reliably when the caller is done, keeps a healthy working set alive
//! in the background, and degrades gracefully when the backing service
//! is slow, unreachable, or returning fatal errors.
//!
//! ## Features
//!
//! - LIFO idle stack: the most recently returned resource is borrowed
//!   next, keeping the warm set minimal under light load
//! - Background creation: a dedicated loop or bounded cancellable tasks,
//!   with continuous-failure detection and fail-fast borrows
//! - Periodic shrink: idle eviction toward `min_idle`, max-lifetime
//!   retirement, keep-alive liveness probing
//! - Leak detection: abandoned handles are force-closed after a timeout
//! - Fatal-error admission control: a failing backend is probed by a
//!   bounded number of borrowers instead of being hammered
//! - Per-holder pooled statement cache with LRU eviction
//!
//! ## Example
//!
//! ```rust,ignore
//! use reservoir_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .initial_size(2)
//!     .min_idle(2)
//!     .max_active(20)
//!     .max_wait(Duration::from_secs(5));
//!
//! let pool = Pool::builder(factory).config(config).build().await?;
//! let handle = pool.get().await?;
//! // use handle.resource() ...
//! handle.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
mod creator;
pub mod error;
mod evictor;
pub mod handle;
mod holder;
mod leak;
pub mod pool;
pub mod statement_cache;
mod store;

pub use config::{CreateStrategy, Fairness, PoolConfig};
pub use error::{PoolError, Result};
pub use handle::{PooledHandle, ResourceGuard};
pub use pool::{Pool, PoolBuilder, PoolStatus};
pub use statement_cache::{PooledStatement, ResultShape, StatementCache};

// Re-export the collaborator contracts so most users only depend on
// this crate.
pub use reservoir_core::{
    BorrowDecision, DiagnosticError, FaultClassifier, FnClassifier, Interceptor, KindClassifier,
    ManagedResource, PoolStats, RecycleDecision, ResourceFactory, ResourceKind, SessionError,
    StatsSink, Validator,
};
