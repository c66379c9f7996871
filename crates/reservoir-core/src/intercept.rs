//! Interceptor hooks around borrow and recycle.
//!
//! Interceptors carry cross-cutting concerns (auditing, security checks,
//! statistics) without the pool knowing about them. The pool invokes the
//! borrow hook before its own borrow logic and the recycle hook before
//! its own return logic; either hook can short-circuit the default
//! behavior.

use async_trait::async_trait;

/// What the borrow hook decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BorrowDecision {
    /// Run the pool's normal borrow path.
    Proceed,
    /// Refuse the borrow; the caller sees a disabled-pool error carrying
    /// this reason.
    Reject(String),
}

/// What the recycle hook decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleDecision {
    /// Run the pool's normal recycle path.
    Proceed,
    /// Skip recycling and discard the resource instead.
    Discard,
}

/// An ordered hook invoked around pool operations.
///
/// Both methods default to [`Proceed`](BorrowDecision::Proceed), so an
/// interceptor only overrides the operations it cares about.
#[async_trait]
pub trait Interceptor<R>: Send + Sync {
    /// Called before the pool's borrow logic.
    async fn on_borrow(&self) -> BorrowDecision {
        BorrowDecision::Proceed
    }

    /// Called before the pool's return logic, with exclusive access to
    /// the resource being returned.
    async fn on_recycle(&self, _resource: &mut R) -> RecycleDecision {
        RecycleDecision::Proceed
    }
}

/// An ordered list of interceptors applied first-to-last.
///
/// The first hook that does not proceed wins; later hooks are skipped.
pub struct InterceptorChain<R> {
    interceptors: Vec<std::sync::Arc<dyn Interceptor<R>>>,
}

impl<R> Default for InterceptorChain<R> {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }
}

impl<R> std::fmt::Debug for InterceptorChain<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

impl<R: Send> InterceptorChain<R> {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor to the end of the chain.
    pub fn push(&mut self, interceptor: std::sync::Arc<dyn Interceptor<R>>) {
        self.interceptors.push(interceptor);
    }

    /// Whether any interceptors are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run every borrow hook in order; the first rejection wins.
    pub async fn on_borrow(&self) -> BorrowDecision {
        for interceptor in &self.interceptors {
            if let BorrowDecision::Reject(reason) = interceptor.on_borrow().await {
                return BorrowDecision::Reject(reason);
            }
        }
        BorrowDecision::Proceed
    }

    /// Run every recycle hook in order; the first discard wins.
    pub async fn on_recycle(&self, resource: &mut R) -> RecycleDecision {
        for interceptor in &self.interceptors {
            if interceptor.on_recycle(resource).await == RecycleDecision::Discard {
                return RecycleDecision::Discard;
            }
        }
        RecycleDecision::Proceed
    }
}
