//! Liveness validation for pooled resources.
//!
//! A [`Validator`] answers one question: is this resource still usable?
//! The pool calls it for borrow-time checks (`test_on_borrow`),
//! return-time checks (`test_on_return`), idle checks (`test_while_idle`),
//! and keep-alive probing. Probes must not observably mutate session
//! state; a `SELECT 1`-class round trip is the expected cost.

use async_trait::async_trait;

use crate::factory::ManagedResource;

/// Liveness probe for a pooled resource.
#[async_trait]
pub trait Validator<R>: Send + Sync {
    /// Probe the resource. `true` means it is safe to hand out or retain.
    async fn probe(&self, resource: &mut R) -> bool;
}

/// Validator that trusts every resource unconditionally.
///
/// Useful when the transport already detects dead peers eagerly, or in
/// tests where probing is irrelevant.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValid;

#[async_trait]
impl<R: Send> Validator<R> for AlwaysValid {
    async fn probe(&self, _resource: &mut R) -> bool {
        true
    }
}

/// Default validator: a resource is valid unless it reports closed.
///
/// This is the cheapest meaningful check and involves no I/O. Drivers
/// that can issue a real ping should supply their own validator instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidator;

#[async_trait]
impl<R: ManagedResource> Validator<R> for DefaultValidator {
    async fn probe(&self, resource: &mut R) -> bool {
        !resource.is_closed()
    }
}

/// Validator backed by a plain function.
pub struct FnValidator<F>(F);

impl<F> FnValidator<F> {
    /// Wrap a synchronous predicate as a validator.
    pub fn new(probe: F) -> Self {
        Self(probe)
    }
}

impl<F> std::fmt::Debug for FnValidator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnValidator").finish_non_exhaustive()
    }
}

#[async_trait]
impl<R, F> Validator<R> for FnValidator<F>
where
    R: Send,
    F: Fn(&mut R) -> bool + Send + Sync,
{
    async fn probe(&self, resource: &mut R) -> bool {
        (self.0)(resource)
    }
}
