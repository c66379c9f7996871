//! # reservoir-core
//!
//! Collaborator contracts for the reservoir resource pool.
//!
//! The pool engine in `reservoir-pool` is agnostic to what it pools. This
//! crate defines the seams it pools *through*:
//!
//! - [`ResourceFactory`] / [`ManagedResource`]: opening, closing, and
//!   resetting one physical resource
//! - [`Validator`]: liveness probing for borrow/return/idle checks
//! - [`FaultClassifier`] and the [`ResourceKind`] registry: deciding which
//!   errors should permanently disable a resource
//! - [`Interceptor`]: ordered hooks around borrow and recycle
//! - [`StatsSink`]: periodic consumption of aggregate pool counters
//!
//! Driver crates implement these traits; applications usually only pick a
//! [`ResourceKind`] and let the built-in registry supply the rest.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod classify;
pub mod factory;
pub mod intercept;
pub mod stats;
pub mod validate;

pub use classify::{
    DiagnosticError, FaultClassifier, FnClassifier, KindClassifier, NeverFatal, ResourceKind,
};
pub use factory::{ManagedResource, ResourceFactory, SessionError};
pub use intercept::{BorrowDecision, Interceptor, InterceptorChain, RecycleDecision};
pub use stats::{PoolStats, StatsSink, TracingStatsSink, TRANSACTION_BUCKETS};
pub use validate::{AlwaysValid, DefaultValidator, FnValidator, Validator};
