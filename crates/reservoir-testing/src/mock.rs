//! Scriptable mock factory and resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use reservoir_core::{DiagnosticError, ManagedResource, ResourceFactory, SessionError, Validator};

/// Errors produced by the mock factory and resource.
#[derive(Debug, Error)]
pub enum MockError {
    /// The factory was scripted to refuse this open.
    #[error("mock open refused")]
    OpenRefused,

    /// A statement-level error: never fatal.
    #[error("mock statement error")]
    Statement,

    /// A connection-level error: the session is gone.
    #[error("mock connection lost")]
    ConnectionLost,
}

impl DiagnosticError for MockError {
    fn sql_state(&self) -> Option<&str> {
        match self {
            Self::ConnectionLost => Some("08006"),
            Self::Statement => Some("42000"),
            Self::OpenRefused => None,
        }
    }

    fn is_disconnect(&self) -> bool {
        matches!(self, Self::ConnectionLost)
    }
}

#[derive(Debug, Default)]
struct MockState {
    seq: AtomicU64,
    opened: AtomicU64,
    closed: AtomicU64,
    rollbacks: AtomicU64,
    resets: AtomicU64,
    probes: AtomicU64,
    fail_next_opens: AtomicU32,
    fail_all_opens: AtomicBool,
    fail_probes: AtomicBool,
    fail_resets: AtomicBool,
    open_delay: Mutex<Duration>,
}

/// One mock resource. Transaction and health state are settable from
/// tests; all session operations record themselves on the factory.
#[derive(Debug)]
pub struct MockResource {
    id: u64,
    state: Arc<MockState>,
    closed: bool,
    healthy: bool,
    in_transaction: bool,
    read_only: bool,
}

impl MockResource {
    /// Factory-assigned id, unique per opened resource.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Simulate the peer dropping the physical connection.
    pub fn kill(&mut self) {
        self.closed = true;
    }

    /// Mark the resource as failing liveness probes without closing it.
    pub fn set_healthy(&mut self, healthy: bool) {
        self.healthy = healthy;
    }

    /// Open a fake transaction.
    pub fn begin_transaction(&mut self, read_only: bool) {
        self.in_transaction = true;
        self.read_only = read_only;
    }

    /// Whether a probe against this resource would currently pass.
    #[must_use]
    pub fn probe_ok(&self) -> bool {
        !self.closed && self.healthy && !self.state.fail_probes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ManagedResource for MockResource {
    fn is_closed(&self) -> bool {
        self.closed
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    async fn rollback(&mut self) -> Result<(), SessionError> {
        self.state.rollbacks.fetch_add(1, Ordering::Relaxed);
        self.in_transaction = false;
        self.read_only = false;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.state.resets.fetch_add(1, Ordering::Relaxed);
        if self.state.fail_resets.load(Ordering::Relaxed) {
            return Err(SessionError::new("scripted reset failure"));
        }
        Ok(())
    }
}

/// Factory producing [`MockResource`]s, with scriptable failures and
/// open/close accounting.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    /// Create a factory with no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources opened so far.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.state.opened.load(Ordering::Relaxed)
    }

    /// Number of resources closed so far.
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::Relaxed)
    }

    /// Number of rollbacks performed across all resources.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.state.rollbacks.load(Ordering::Relaxed)
    }

    /// Number of session resets performed across all resources.
    #[must_use]
    pub fn resets(&self) -> u64 {
        self.state.resets.load(Ordering::Relaxed)
    }

    /// Number of probes performed across all resources.
    #[must_use]
    pub fn probes(&self) -> u64 {
        self.state.probes.load(Ordering::Relaxed)
    }

    /// Fail the next `count` opens with [`MockError::OpenRefused`].
    pub fn fail_next_opens(&self, count: u32) {
        self.state.fail_next_opens.store(count, Ordering::Relaxed);
    }

    /// Fail every open until cleared.
    pub fn fail_all_opens(&self, fail: bool) {
        self.state.fail_all_opens.store(fail, Ordering::Relaxed);
    }

    /// Make every probe fail until cleared.
    pub fn fail_probes(&self, fail: bool) {
        self.state.fail_probes.store(fail, Ordering::Relaxed);
    }

    /// Make every session reset fail until cleared.
    pub fn fail_resets(&self, fail: bool) {
        self.state.fail_resets.store(fail, Ordering::Relaxed);
    }

    /// Delay every open by the given duration.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock() = delay;
    }
}

#[async_trait]
impl ResourceFactory for MockFactory {
    type Resource = MockResource;
    type Error = MockError;

    async fn open(&self) -> Result<MockResource, MockError> {
        if self.state.fail_all_opens.load(Ordering::Relaxed) {
            return Err(MockError::OpenRefused);
        }
        let remaining = self.state.fail_next_opens.load(Ordering::Relaxed);
        if remaining > 0
            && self
                .state
                .fail_next_opens
                .compare_exchange(remaining, remaining - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return Err(MockError::OpenRefused);
        }

        let delay = *self.state.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state.opened.fetch_add(1, Ordering::Relaxed);
        Ok(MockResource {
            id: self.state.seq.fetch_add(1, Ordering::Relaxed) + 1,
            state: self.state.clone(),
            closed: false,
            healthy: true,
            in_transaction: false,
            read_only: false,
        })
    }

    async fn close(&self, _resource: MockResource) {
        self.state.closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Validator honoring each resource's health flag and the factory's
/// scripted probe failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockValidator;

#[async_trait]
impl Validator<MockResource> for MockValidator {
    async fn probe(&self, resource: &mut MockResource) -> bool {
        resource.state.probes.fetch_add(1, Ordering::Relaxed);
        resource.probe_ok()
    }
}
