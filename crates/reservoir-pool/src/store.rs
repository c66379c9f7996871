//! The mutex-guarded holder store.
//!
//! All shared pool state lives in [`StoreState`] behind one
//! `parking_lot::Mutex` per pool. The idle set is a LIFO stack: the most
//! recently returned resource is borrowed next, keeping the warm set
//! minimal under light load.
//!
//! Two condition variables hang off the mutex conceptually. Borrowers
//! wait on "not-empty" via explicit [`Waiter`] registrations (a queue of
//! `Notify` handles mutated only under the mutex); the dedicated creator
//! waits on "empty" via a single `Notify` owned by the pool. A waiter
//! that is signalled but times out anyway passes the signal on, so a
//! push never strands a wakeup.
//!
//! Nothing in this module performs I/O; the mutex is never held across
//! an `.await`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use reservoir_core::{PoolStats, TRANSACTION_BUCKETS};

use crate::config::Fairness;
use crate::holder::Holder;
use crate::statement_cache::CacheCounters;

/// Number of transaction histogram buckets, including the overflow
/// bucket.
pub(crate) const TXN_BUCKET_COUNT: usize = TRANSACTION_BUCKETS.len() + 1;

/// One blocked borrower.
///
/// Registered in the waiter queue under the pool mutex. `signaled` is
/// written under the mutex as well; it is atomic only so the waiting
/// task can hold the `Arc` without aliasing issues.
pub(crate) struct Waiter {
    pub(crate) notify: Notify,
    pub(crate) signaled: AtomicBool,
}

impl Waiter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            notify: Notify::new(),
            signaled: AtomicBool::new(false),
        })
    }
}

/// Cumulative counters, reset on stats snapshot.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) active_peak: usize,
    pub(crate) idle_peak: usize,
    pub(crate) borrow_count: u64,
    pub(crate) recycle_count: u64,
    pub(crate) wait_count: u64,
    pub(crate) wait_time: Duration,
    pub(crate) create_count: u64,
    pub(crate) destroy_count: u64,
    pub(crate) discard_count: u64,
    pub(crate) create_error_count: u64,
    pub(crate) recycle_error_count: u64,
    pub(crate) abandoned_count: u64,
    pub(crate) keep_alive_check_count: u64,
    pub(crate) txn_histogram: [u64; TXN_BUCKET_COUNT],
}

impl Counters {
    pub(crate) fn record_transaction(&mut self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let bucket = TRANSACTION_BUCKETS
            .iter()
            .position(|bound| millis < *bound)
            .unwrap_or(TRANSACTION_BUCKETS.len());
        self.txn_histogram[bucket] += 1;
    }
}

/// Everything mutated under the pool mutex.
pub(crate) struct StoreState<R> {
    pub(crate) idle: Vec<Holder<R>>,
    pub(crate) active_count: usize,
    pub(crate) closing: bool,
    pub(crate) closed: bool,
    pub(crate) enabled: bool,
    pub(crate) disable_cause: Option<String>,

    waiters: VecDeque<Arc<Waiter>>,

    /// In-flight synchronous opens (direct creation or dedicated loop).
    pub(crate) creating_count: usize,
    /// Single-slot gate for the direct-creation fast path.
    pub(crate) creating_direct: bool,
    /// Pending task-scheduled creations.
    pub(crate) create_task_count: usize,
    pub(crate) create_tasks: HashMap<u64, tokio::task::AbortHandle>,
    pub(crate) continuous_failure: bool,
    pub(crate) last_create_error: Option<String>,

    pub(crate) fatal_error_count: u64,
    pub(crate) fatal_count_last_shrink: u64,
    pub(crate) last_fatal_time: Option<Instant>,
    pub(crate) on_fatal_error: bool,

    pub(crate) counters: Counters,

    /// Monotonic creation count, never reset by stats snapshots. Drives
    /// warm-up progress checks.
    pub(crate) lifetime_create_count: u64,
    /// Monotonic discard count, never reset. The dedicated creator uses
    /// deltas to notice discard bursts between wakeups.
    pub(crate) lifetime_discard_count: u64,

    max_active: usize,
    fairness: Fairness,
}

impl<R> StoreState<R> {
    pub(crate) fn new(max_active: usize, fairness: Fairness) -> Self {
        Self {
            idle: Vec::with_capacity(max_active),
            active_count: 0,
            closing: false,
            closed: false,
            enabled: true,
            disable_cause: None,
            waiters: VecDeque::new(),
            creating_count: 0,
            creating_direct: false,
            create_task_count: 0,
            create_tasks: HashMap::new(),
            continuous_failure: false,
            last_create_error: None,
            fatal_error_count: 0,
            fatal_count_last_shrink: 0,
            last_fatal_time: None,
            on_fatal_error: false,
            counters: Counters::default(),
            lifetime_create_count: 0,
            lifetime_discard_count: 0,
            max_active,
            fairness,
        }
    }

    /// Resources that exist right now: borrowed plus idle.
    pub(crate) fn total(&self) -> usize {
        self.active_count + self.idle.len()
    }

    /// Resources that exist or are being created.
    pub(crate) fn total_with_pending(&self) -> usize {
        self.total() + self.creating_count + self.create_task_count
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active
    }

    pub(crate) fn waiting_count(&self) -> usize {
        self.waiters.len()
    }

    /// Push a holder onto the idle stack and wake one waiter.
    ///
    /// Returns the holder back to the caller when it cannot be stored:
    /// the pool is closing, the holder is discarded, or storing it would
    /// exceed capacity. Rejected holders must be physically closed by
    /// the caller.
    pub(crate) fn put(&mut self, mut holder: Holder<R>, touch: bool) -> Result<(), Holder<R>> {
        if self.closing || self.closed || holder.discard || self.total() >= self.max_active {
            return Err(holder);
        }

        if touch {
            holder.last_active = Instant::now();
        }
        holder.active = false;
        self.idle.push(holder);

        if self.idle.len() > self.counters.idle_peak {
            self.counters.idle_peak = self.idle.len();
        }

        self.signal_one_waiter();
        Ok(())
    }

    /// Pop the most recently returned holder.
    pub(crate) fn pop_idle(&mut self) -> Option<Holder<R>> {
        self.idle.pop()
    }

    /// Bookkeeping for a successful borrow. Call with the holder just
    /// popped (or directly created). `last_active` is deliberately left
    /// alone: it tracks return time, and borrow-time validation reads it
    /// as the idle age.
    pub(crate) fn mark_borrowed(&mut self, holder: &mut Holder<R>) {
        self.active_count += 1;
        holder.active = true;
        holder.use_count += 1;
        if self.active_count > self.counters.active_peak {
            self.counters.active_peak = self.active_count;
        }
        self.counters.borrow_count += 1;
    }

    /// Register a borrower on the not-empty queue.
    pub(crate) fn register_waiter(&mut self, waiter: &Arc<Waiter>) {
        waiter.signaled.store(false, Ordering::Relaxed);
        self.waiters.push_back(waiter.clone());
        self.counters.wait_count += 1;
    }

    /// Remove a borrower from the queue. Returns `false` when the waiter
    /// was already taken by a signal.
    pub(crate) fn remove_waiter(&mut self, waiter: &Arc<Waiter>) -> bool {
        if let Some(pos) = self.waiters.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            let _ = self.waiters.remove(pos);
            true
        } else {
            false
        }
    }

    /// Wake one waiter according to the fairness mode.
    pub(crate) fn signal_one_waiter(&mut self) {
        let next = match self.fairness {
            Fairness::Fifo => self.waiters.pop_front(),
            Fairness::Lifo => self.waiters.pop_back(),
        };
        if let Some(waiter) = next {
            waiter.signaled.store(true, Ordering::Relaxed);
            waiter.notify.notify_one();
        }
    }

    /// Wake every waiter (shutdown, disable, fail-fast).
    pub(crate) fn signal_all_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            waiter.signaled.store(true, Ordering::Relaxed);
            waiter.notify.notify_one();
        }
    }

    /// Take a stats snapshot and reset the cumulative counters.
    pub(crate) fn snapshot_and_reset(&mut self, cache: &CacheCounters) -> PoolStats {
        let (hits, misses) = cache.take();
        let counters = std::mem::take(&mut self.counters);
        PoolStats {
            active: self.active_count,
            idle: self.idle.len(),
            max_active: self.max_active,
            active_peak: counters.active_peak,
            idle_peak: counters.idle_peak,
            borrow_count: counters.borrow_count,
            recycle_count: counters.recycle_count,
            wait_count: counters.wait_count,
            wait_time: counters.wait_time,
            create_count: counters.create_count,
            destroy_count: counters.destroy_count,
            discard_count: counters.discard_count,
            create_error_count: counters.create_error_count,
            recycle_error_count: counters.recycle_error_count,
            abandoned_count: counters.abandoned_count,
            keep_alive_check_count: counters.keep_alive_check_count,
            cache_hits: hits,
            cache_misses: misses,
            transaction_histogram: counters.txn_histogram.to_vec(),
        }
    }
}

impl<R> std::fmt::Debug for StoreState<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreState")
            .field("idle", &self.idle.len())
            .field("active", &self.active_count)
            .field("waiters", &self.waiters.len())
            .field("closed", &self.closed)
            .field("enabled", &self.enabled)
            .finish()
    }
}
