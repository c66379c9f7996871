//! The caller-facing lease on a pooled resource.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

use reservoir_core::ResourceFactory;

use crate::error::{PoolError, Result};
use crate::holder::Holder;
use crate::pool::PoolCore;
use crate::statement_cache::StatementCache;

/// State shared between the handle, the leak table, and the pool.
pub(crate) struct HandleShared<R> {
    pub(crate) id: u64,
    pub(crate) borrowed_at: Instant,
    pub(crate) owner: String,
    /// Caller-maintained "unit of work in progress" flag; leak detection
    /// never reclaims a running handle.
    pub(crate) running: AtomicBool,
    /// Whether this handle is registered in the leak table.
    pub(crate) trace: AtomicBool,
    pub(crate) backtrace: Option<Backtrace>,
    pub(crate) slot: Mutex<HandleSlot<R>>,
}

pub(crate) struct HandleSlot<R> {
    pub(crate) holder: Option<Holder<R>>,
    /// Set when the handle was disabled by a fatal error or forced
    /// reclamation; distinguishes "closed by caller" for diagnostics.
    pub(crate) disabled: bool,
    /// Set by [`PooledHandle::note_transaction_begin`]; consumed at
    /// recycle for the transaction-duration histogram.
    pub(crate) txn_started: Option<Instant>,
}

/// A single-use lease on a pooled resource.
///
/// Obtained from [`Pool::get`](crate::Pool::get). Access the underlying
/// resource through [`resource`](Self::resource); return it with
/// [`close`](Self::close) or by dropping the handle. Closing twice is a
/// no-op.
///
/// At most one live handle references any holder, enforced by ownership:
/// the holder moves into the handle at borrow and out at close.
pub struct PooledHandle<F: ResourceFactory> {
    pub(crate) shared: Arc<HandleShared<F::Resource>>,
    pub(crate) pool: Arc<PoolCore<F>>,
    pub(crate) returned: bool,
}

impl<F: ResourceFactory> PooledHandle<F> {
    /// Identifier of the underlying holder for the duration of this
    /// lease. Stable across borrow/recycle cycles of the same physical
    /// resource.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// How long this lease has been outstanding.
    #[must_use]
    pub fn lease_age(&self) -> Duration {
        self.shared.borrowed_at.elapsed()
    }

    /// Exclusive access to the pooled resource.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] after the handle was closed,
    /// detached, disabled by a fatal error, or reclaimed.
    pub async fn resource(&self) -> Result<ResourceGuard<'_, F::Resource>> {
        let slot = self.shared.slot.lock().await;
        if slot.holder.is_none() {
            return Err(PoolError::StaleHandle);
        }
        Ok(ResourceGuard { slot })
    }

    /// Number of times the underlying resource has been borrowed,
    /// including this lease.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] after the handle was closed.
    pub async fn use_count(&self) -> Result<u64> {
        let slot = self.shared.slot.lock().await;
        slot.holder
            .as_ref()
            .map(|h| h.use_count)
            .ok_or(PoolError::StaleHandle)
    }

    /// Mark the start of a unit of work. While marked, leak detection
    /// will not reclaim this handle even past the abandoned timeout.
    pub fn begin_work(&self) {
        self.shared.running.store(true, Ordering::Relaxed);
    }

    /// Mark the end of a unit of work.
    pub fn end_work(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
    }

    /// Record that the borrower opened a transaction. The duration until
    /// recycle-time rollback feeds the transaction histogram.
    pub async fn note_transaction_begin(&self) {
        let mut slot = self.shared.slot.lock().await;
        slot.txn_started = Some(Instant::now());
    }

    /// Run a closure against this holder's statement cache.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] after the handle was closed.
    pub async fn with_statement_cache<T>(
        &self,
        f: impl FnOnce(&mut StatementCache) -> T,
    ) -> Result<T> {
        let slot = self.shared.slot.lock().await;
        let holder = slot.holder.as_ref().ok_or(PoolError::StaleHandle)?;
        Ok(f(&mut holder.cache.lock()))
    }

    /// Report a resource-level error observed by the borrower.
    ///
    /// If the pool's fault classifier deems the error fatal, the
    /// underlying resource is permanently disabled and discarded, and
    /// the fatal-error admission window advances. Returns `true` when
    /// the error was classified fatal.
    pub async fn report_error(&self, error: &F::Error) -> bool {
        self.pool.handle_resource_error(&self.shared, error).await
    }

    /// Return the resource to the pool.
    ///
    /// Always succeeds from the caller's perspective; reset failures are
    /// recovered internally by discarding the resource. Calling `close`
    /// on an already-closed handle is a no-op.
    pub async fn close(mut self) {
        self.returned = true;
        self.pool.recycle_shared(&self.shared).await;
    }

    /// Remove the resource from the pool permanently and hand it to the
    /// caller. The pool's capacity slot is released.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::StaleHandle`] after the handle was closed.
    pub async fn detach(mut self) -> Result<F::Resource> {
        self.returned = true;
        self.pool.detach_shared(&self.shared).await
    }
}

impl<F: ResourceFactory> std::fmt::Debug for PooledHandle<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledHandle")
            .field("id", &self.shared.id)
            .field("owner", &self.shared.owner)
            .finish()
    }
}

impl<F: ResourceFactory> Drop for PooledHandle<F> {
    fn drop(&mut self) {
        if self.returned {
            return;
        }
        // Dropping without close(): hand the recycle to a detached task.
        // Outside a runtime the holder is dropped in place; the
        // resource's own Drop tears down the physical connection and the
        // pool corrects its accounting through the leak table if
        // tracking is enabled.
        let shared = self.shared.clone();
        let pool = self.pool.clone();
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let _ = rt.spawn(async move {
                pool.recycle_shared(&shared).await;
            });
        } else {
            pool.recycle_dropped_outside_runtime(&shared);
        }
    }
}

/// Exclusive access to a pooled resource, held for the duration of an
/// operation. Releasing the guard releases the per-handle lock.
pub struct ResourceGuard<'a, R> {
    slot: MutexGuard<'a, HandleSlot<R>>,
}

impl<R> std::ops::Deref for ResourceGuard<'_, R> {
    type Target = R;

    // The guard is only constructed with a present holder, and the
    // holder cannot leave the slot while the lock is held.
    #[allow(clippy::unwrap_used)]
    fn deref(&self) -> &R {
        &self.slot.holder.as_ref().unwrap().resource
    }
}

impl<R> std::ops::DerefMut for ResourceGuard<'_, R> {
    #[allow(clippy::unwrap_used)]
    fn deref_mut(&mut self) -> &mut R {
        &mut self.slot.holder.as_mut().unwrap().resource
    }
}

impl<R> std::fmt::Debug for ResourceGuard<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard").finish_non_exhaustive()
    }
}
