//! Resource factory and managed-resource contracts.
//!
//! A [`ResourceFactory`] knows how to open and close one physical resource
//! (a database connection, in the common case). The pool never touches the
//! wire itself: creation, teardown, and session-state manipulation all go
//! through these traits.
//!
//! `#[async_trait]` is used throughout so the pool can hold factories as
//! trait objects and move creation work onto spawned tasks.

use async_trait::async_trait;
use thiserror::Error;

/// Error raised while manipulating session-level state on a resource
/// (rollback, reset-to-defaults).
///
/// The pool recovers from these locally: a resource whose session state
/// cannot be restored is force-discarded rather than returned to the idle
/// set, and the error is counted, not surfaced to the caller.
#[derive(Debug, Error)]
#[error("session state error: {0}")]
pub struct SessionError(pub String);

impl SessionError {
    /// Create a session error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// The session-state surface the pool needs from a pooled resource.
///
/// Implementations wrap one physical connection. All methods are invoked
/// with exclusive access (`&mut self` or single-owner semantics enforced
/// by the pool), so no internal locking is required.
#[async_trait]
pub trait ManagedResource: Send + 'static {
    /// Whether the underlying physical resource has been closed or has
    /// observed a terminal transport failure.
    fn is_closed(&self) -> bool;

    /// Whether a transaction is currently open on this resource.
    fn in_transaction(&self) -> bool;

    /// Whether the open transaction (if any) is read-only.
    ///
    /// Read-only transactions are not rolled back on return.
    fn is_read_only(&self) -> bool;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), SessionError>;

    /// Restore session-level state to defaults: clear warnings, drop
    /// server-side temporary state, reset options changed by the borrower.
    async fn reset(&mut self) -> Result<(), SessionError>;
}

/// Opens and closes physical resources on behalf of the pool.
///
/// Connection parameters (address, credentials, timeouts) belong to the
/// factory itself; the pool only asks for "one more resource".
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: ManagedResource;

    /// The error type produced by failed opens. Caller-visible resource
    /// errors reported back to the pool are classified against this same
    /// type by the pool's [`FaultClassifier`](crate::FaultClassifier).
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open one physical resource.
    ///
    /// Failures are retried by the pool's creator per its retry policy;
    /// implementations should apply their own connect/read timeouts.
    async fn open(&self) -> Result<Self::Resource, Self::Error>;

    /// Close one physical resource, best-effort.
    ///
    /// The pool never propagates close failures; implementations should
    /// log and swallow them.
    async fn close(&self, resource: Self::Resource);
}

#[async_trait]
impl<F: ResourceFactory> ResourceFactory for std::sync::Arc<F> {
    type Resource = F::Resource;
    type Error = F::Error;

    async fn open(&self) -> Result<Self::Resource, Self::Error> {
        (**self).open().await
    }

    async fn close(&self, resource: Self::Resource) {
        (**self).close(resource).await;
    }
}
