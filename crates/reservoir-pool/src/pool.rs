//! The pool: borrow and recycle protocols, lifecycle, worker wiring.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use reservoir_core::{
    BorrowDecision, DefaultValidator, FaultClassifier, InterceptorChain, ManagedResource,
    NeverFatal, PoolStats, RecycleDecision, ResourceFactory, StatsSink, TracingStatsSink,
    Validator,
};

use crate::config::{CreateStrategy, PoolConfig};
use crate::creator;
use crate::error::{PoolError, Result};
use crate::evictor;
use crate::handle::{HandleShared, HandleSlot, PooledHandle};
use crate::holder::Holder;
use crate::leak::LeakTable;
use crate::statement_cache::CacheCounters;
use crate::store::{StoreState, Waiter};

/// Outcome of one locked decision step inside the borrow loop. Lets the
/// critical section release the store lock before any `.await`, keeping
/// the borrow future `Send`.
enum BorrowStep<R> {
    /// The task-scheduled fast path: this borrower will create directly.
    DirectCreate,
    /// A raced-with-eviction holder to destroy, then retry.
    Discard(Holder<R>),
    /// No resource available: wait for a signal (carries the wait start).
    Wait(Instant),
}

/// Point-in-time pool gauges.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Resources currently borrowed.
    pub active: usize,
    /// Resources currently idle.
    pub idle: usize,
    /// Configured capacity.
    pub max_active: usize,
    /// Borrowers currently blocked waiting.
    pub waiting: usize,
}

/// A managed pool of expensive, long-lived resources.
///
/// Cloning is cheap and shares the same pool. Construct with
/// [`Pool::builder`]; shut down with [`Pool::close`].
pub struct Pool<F: ResourceFactory> {
    core: Arc<PoolCore<F>>,
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<F: ResourceFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("Pool")
            .field("active", &status.active)
            .field("idle", &status.idle)
            .field("max_active", &status.max_active)
            .finish()
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder<F: ResourceFactory> {
    factory: F,
    config: PoolConfig,
    validator: Arc<dyn Validator<F::Resource>>,
    classifier: Arc<dyn FaultClassifier<F::Error>>,
    interceptors: InterceptorChain<F::Resource>,
    sink: Arc<dyn StatsSink>,
}

impl<F: ResourceFactory> PoolBuilder<F> {
    /// Start building a pool around the given factory.
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            config: PoolConfig::default(),
            validator: Arc::new(DefaultValidator),
            classifier: Arc::new(NeverFatal),
            interceptors: InterceptorChain::new(),
            sink: Arc::new(TracingStatsSink),
        }
    }

    /// Use the given configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom liveness validator.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator<F::Resource>>) -> Self {
        self.validator = validator;
        self
    }

    /// Use a custom fault classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn FaultClassifier<F::Error>>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Classify faults with the built-in table for the given database
    /// family.
    #[must_use]
    pub fn resource_kind(mut self, kind: reservoir_core::ResourceKind) -> Self
    where
        F::Error: reservoir_core::DiagnosticError,
    {
        self.classifier = Arc::new(reservoir_core::KindClassifier::new(kind));
        self
    }

    /// Append an interceptor to the hook chain.
    #[must_use]
    pub fn interceptor(
        mut self,
        interceptor: Arc<dyn reservoir_core::Interceptor<F::Resource>>,
    ) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Send periodic stats snapshots to the given sink.
    #[must_use]
    pub fn stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate the configuration, perform the initial fill, and start
    /// the background workers.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Capacity`] for invalid configuration and
    /// [`PoolError::Creation`] when the synchronous initial fill fails.
    pub async fn build(self) -> Result<Pool<F>> {
        self.config.validate()?;
        let config = self.config;

        let core = Arc::new(PoolCore {
            state: Mutex::new(StoreState::new(config.max_active, config.fairness)),
            factory: self.factory,
            validator: self.validator,
            classifier: self.classifier,
            interceptors: self.interceptors,
            leak: LeakTable::default(),
            cache_counters: Arc::new(CacheCounters::default()),
            creator_notify: Notify::new(),
            sink: self.sink,
            holder_seq: AtomicU64::new(0),
            task_seq: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
            config,
        });

        if !core.config.async_init {
            for _ in 0..core.config.initial_size {
                let resource = core
                    .factory
                    .open()
                    .await
                    .map_err(|e| PoolError::Creation(Box::new(e)))?;
                let holder = core.new_holder(resource);
                let mut state = core.state.lock();
                state.counters.create_count += 1;
                state.lifetime_create_count += 1;
                if let Err(holder) = state.put(holder, false) {
                    drop(state);
                    core.destroy_resource(holder.into_resource()).await;
                }
            }
        }

        core.start_workers();

        tracing::info!(
            max_active = core.config.max_active,
            min_idle = core.config.min_idle,
            initial = core.config.initial_size,
            "pool started"
        );

        Ok(Pool { core })
    }
}

impl<F: ResourceFactory> Pool<F> {
    /// Start building a pool around the given factory.
    #[must_use]
    pub fn builder(factory: F) -> PoolBuilder<F> {
        PoolBuilder::new(factory)
    }

    /// Borrow a resource, waiting up to the configured `max_wait` (or
    /// indefinitely if none is configured).
    ///
    /// # Errors
    ///
    /// See [`PoolError`] for the failure taxonomy; timeouts carry a
    /// diagnostic snapshot.
    pub async fn get(&self) -> Result<PooledHandle<F>> {
        self.core.acquire(self.core.config.max_wait).await
    }

    /// Borrow a resource with an explicit wait deadline.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Timeout`] when the deadline expires with
    /// nothing available.
    pub async fn get_timeout(&self, max_wait: Duration) -> Result<PooledHandle<F>> {
        self.core.acquire(Some(max_wait)).await
    }

    /// Borrow an idle resource without waiting or creating.
    ///
    /// Returns `Ok(None)` when nothing is immediately available.
    ///
    /// # Errors
    ///
    /// Propagates closed/disabled/admission rejections.
    pub async fn try_get(&self) -> Result<Option<PooledHandle<F>>> {
        self.core.try_acquire().await
    }

    /// Current pool gauges.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.core.state.lock();
        PoolStatus {
            active: state.active_count,
            idle: state.idle.len(),
            max_active: state.max_active(),
            waiting: state.waiting_count(),
        }
    }

    /// Take a stats snapshot, resetting cumulative counters.
    #[must_use]
    pub fn take_stats(&self) -> PoolStats {
        self.core.take_stats()
    }

    /// Whether the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.state.lock().closed
    }

    /// Administratively disable borrowing. Blocked borrowers wake with a
    /// disabled-pool error carrying `cause`.
    pub fn disable(&self, cause: impl Into<String>) {
        let mut state = self.core.state.lock();
        state.enabled = false;
        state.disable_cause = Some(cause.into());
        state.signal_all_waiters();
        tracing::warn!(
            cause = state.disable_cause.as_deref().unwrap_or(""),
            "pool disabled"
        );
    }

    /// Re-enable borrowing after [`disable`](Self::disable).
    pub fn enable(&self) {
        let mut state = self.core.state.lock();
        if !state.closed {
            state.enabled = true;
            state.disable_cause = None;
        }
    }

    /// Run one shrink pass immediately, outside the evictor schedule.
    pub async fn shrink(&self) {
        evictor::shrink(&self.core, true).await;
    }

    /// Run one abandoned-handle reclamation pass immediately.
    pub async fn reclaim_abandoned(&self) -> u64 {
        evictor::reclaim_abandoned(&self.core).await
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.core.config
    }

    /// Shut the pool down.
    ///
    /// Wakes every blocked borrower with a closed-pool error, stops the
    /// background workers, cancels pending creation tasks, and closes
    /// every idle resource exactly once. In-flight returns still
    /// complete; their resources are closed on arrival.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.core.state.lock();
            if state.closed || state.closing {
                return;
            }
            state.closing = true;
            state.enabled = false;
            state.disable_cause = Some("pool closed".into());
            for (_, task) in state.create_tasks.drain() {
                task.abort();
            }
            state.create_task_count = 0;
            state.signal_all_waiters();
            let drained: Vec<Holder<F::Resource>> = state.idle.drain(..).collect();
            drained
        };

        for worker in self.core.workers.lock().drain(..) {
            worker.abort();
        }
        self.core.creator_notify.notify_one();

        let drained_count = drained.len();
        for holder in drained {
            holder.clear_cache();
            self.core.destroy_resource(holder.into_resource()).await;
        }

        {
            let mut state = self.core.state.lock();
            state.closed = true;
            state.closing = false;
        }
        tracing::info!(drained = drained_count, "pool closed");
    }
}

/// Shared pool internals.
pub(crate) struct PoolCore<F: ResourceFactory> {
    pub(crate) config: PoolConfig,
    pub(crate) factory: F,
    pub(crate) state: Mutex<StoreState<F::Resource>>,
    pub(crate) validator: Arc<dyn Validator<F::Resource>>,
    pub(crate) classifier: Arc<dyn FaultClassifier<F::Error>>,
    pub(crate) interceptors: InterceptorChain<F::Resource>,
    pub(crate) leak: LeakTable<F::Resource>,
    pub(crate) cache_counters: Arc<CacheCounters>,
    /// The "empty" signal: wakes the dedicated creator.
    pub(crate) creator_notify: Notify,
    pub(crate) sink: Arc<dyn StatsSink>,
    holder_seq: AtomicU64,
    task_seq: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: ResourceFactory> PoolCore<F> {
    fn start_workers(self: &Arc<Self>) {
        let mut workers = self.workers.lock();

        match self.config.create_strategy {
            CreateStrategy::DedicatedLoop => {
                let core = self.clone();
                workers.push(tokio::spawn(creator::run_dedicated(core)));
            }
            CreateStrategy::TaskScheduled => {
                if self.config.async_init && self.config.initial_size > 0 {
                    let mut state = self.state.lock();
                    for _ in 0..self.config.initial_size {
                        if state.total_with_pending() >= state.max_active()
                            || state.create_task_count >= self.config.max_create_task_count
                        {
                            break;
                        }
                        self.spawn_create_task(&mut state, true);
                    }
                }
            }
        }

        {
            let core = self.clone();
            workers.push(tokio::spawn(evictor::run(core)));
        }

        if let Some(interval) = self.config.stats_interval {
            let core = self.clone();
            workers.push(tokio::spawn(evictor::run_stats(core, interval)));
        }
    }

    pub(crate) fn new_holder(&self, resource: F::Resource) -> Holder<F::Resource> {
        let id = self.holder_seq.fetch_add(1, Ordering::Relaxed) + 1;
        Holder::new(
            id,
            resource,
            self.config.statement_cache_size,
            self.cache_counters.clone(),
        )
    }

    pub(crate) fn is_closed(&self) -> bool {
        let state = self.state.lock();
        state.closed || state.closing
    }

    pub(crate) fn take_stats(&self) -> PoolStats {
        self.state.lock().snapshot_and_reset(&self.cache_counters)
    }

    // ------------------------------------------------------------------
    // Borrow protocol
    // ------------------------------------------------------------------

    /// Outer borrow loop: interceptors, store borrow, borrow-time
    /// validation, timeout retry.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        max_wait: Option<Duration>,
    ) -> Result<PooledHandle<F>> {
        if !self.interceptors.is_empty() {
            if let BorrowDecision::Reject(reason) = self.interceptors.on_borrow().await {
                return Err(PoolError::Rejected(reason));
            }
        }

        let mut timeout_retries = 0u32;
        loop {
            let mut holder = match self.borrow_internal(max_wait).await {
                Ok(holder) => holder,
                Err(err @ PoolError::Timeout { .. }) => {
                    let not_full = {
                        let state = self.state.lock();
                        state.total_with_pending() < state.max_active()
                    };
                    if not_full && timeout_retries < self.config.retry_on_timeout_if_not_full {
                        timeout_retries += 1;
                        tracing::debug!(
                            retry = timeout_retries,
                            "borrow timed out while pool not full, retrying"
                        );
                        continue;
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            let idle_age = holder.idle_for(Instant::now());
            let probe_needed = self.config.test_on_borrow
                || (self.config.test_while_idle && idle_age >= self.config.eviction_interval);
            if probe_needed && !self.validator.probe(&mut holder.resource).await {
                tracing::debug!(holder = holder.id, "borrow-time validation failed");
                let _ = self.discard_holder(holder).await;
                continue;
            }

            return Ok(self.wrap_handle(holder));
        }
    }

    pub(crate) async fn try_acquire(self: &Arc<Self>) -> Result<Option<PooledHandle<F>>> {
        loop {
            let popped = {
                let mut state = self.state.lock();
                self.check_admission(&state)?;
                match state.pop_idle() {
                    Some(mut holder) => {
                        if holder.discard {
                            Err(holder)
                        } else {
                            state.mark_borrowed(&mut holder);
                            Ok(Some(holder))
                        }
                    }
                    None => Ok(None),
                }
            };

            match popped {
                Ok(Some(mut holder)) => {
                    if self.config.test_on_borrow
                        && !self.validator.probe(&mut holder.resource).await
                    {
                        let _ = self.discard_holder(holder).await;
                        continue;
                    }
                    return Ok(Some(self.wrap_handle(holder)));
                }
                Ok(None) => return Ok(None),
                Err(holder) => {
                    // Raced with eviction; drop it and look again.
                    self.destroy_resource(holder.into_resource()).await;
                }
            }
        }
    }

    fn check_admission(&self, state: &StoreState<F::Resource>) -> Result<()> {
        if state.closed || state.closing {
            return Err(PoolError::Closed);
        }
        if !state.enabled {
            return Err(PoolError::Disabled {
                cause: state.disable_cause.clone(),
            });
        }
        if let Some(ceiling) = self.config.on_fatal_error_max_active {
            if state.on_fatal_error && state.active_count >= ceiling {
                return Err(PoolError::AdmissionDenied {
                    active: state.active_count,
                    ceiling,
                });
            }
        }
        Ok(())
    }

    fn timeout_error(&self, state: &StoreState<F::Resource>, wait: Duration) -> PoolError {
        PoolError::Timeout {
            wait,
            active: state.active_count,
            max_active: state.max_active(),
            idle: state.idle.len(),
            creating: state.creating_count + state.create_task_count,
            last_create_error: state.last_create_error.clone(),
        }
    }

    /// The store borrow protocol: admission checks, LIFO pop, blocking
    /// with deadline, and the single-slot direct-creation fast path.
    async fn borrow_internal(
        self: &Arc<Self>,
        max_wait: Option<Duration>,
    ) -> Result<Holder<F::Resource>> {
        let start = Instant::now();
        let deadline = max_wait.map(|d| start + d);
        let waiter = Waiter::new();
        let mut direct_create = false;

        loop {
            if direct_create {
                direct_create = false;
                match self.create_direct(deadline).await? {
                    Some(holder) => return Ok(holder),
                    None => continue,
                }
            }

            // Locked decision step. The guard is confined to this block
            // and released before any `.await` below, so the borrow
            // future stays `Send`.
            let step = {
                let mut state = self.state.lock();
                self.check_admission(&state)?;

                if let Some(max_waiters) = self.config.max_wait_thread_count {
                    if state.waiting_count() > max_waiters {
                        return Err(PoolError::WaitQueueFull { max: max_waiters });
                    }
                }

                // Bursty-demand fast path: the task-scheduled creator has
                // work queued but nothing delivered yet, so this borrower
                // opens one resource itself, gated to one at a time.
                if self.config.create_strategy == CreateStrategy::TaskScheduled
                    && state.idle.is_empty()
                    && state.active_count < state.max_active()
                    && !state.creating_direct
                    && state.creating_count == 0
                    && state.create_task_count > 0
                {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(self.timeout_error(&state, start.elapsed()));
                    }
                    state.creating_direct = true;
                    state.creating_count += 1;
                    direct_create = true;
                    BorrowStep::DirectCreate
                } else {
                    match state.pop_idle() {
                        Some(mut holder) => {
                            if holder.discard {
                                // Raced with eviction: treat as empty and
                                // retry, honoring the deadline.
                                BorrowStep::Discard(holder)
                            } else {
                                state.mark_borrowed(&mut holder);
                                return Ok(holder);
                            }
                        }
                        None => {
                            // Idle set is empty: kick the creator, then wait.
                            self.signal_empty_locked(&mut state, 1);

                            if self.config.fail_fast && state.continuous_failure {
                                return Err(PoolError::ContinuousFailure {
                                    last: state.last_create_error.clone(),
                                });
                            }

                            let wait_start = Instant::now();
                            if deadline.is_some_and(|d| wait_start >= d) {
                                return Err(self.timeout_error(&state, start.elapsed()));
                            }

                            state.register_waiter(&waiter);
                            BorrowStep::Wait(wait_start)
                        }
                    }
                }
            };

            match step {
                BorrowStep::DirectCreate => continue,
                BorrowStep::Discard(holder) => {
                    self.destroy_resource(holder.into_resource()).await;
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        let state = self.state.lock();
                        return Err(self.timeout_error(&state, start.elapsed()));
                    }
                }
                BorrowStep::Wait(wait_start) => {
                    let lapsed = match deadline {
                        Some(d) => {
                            tokio::time::timeout_at(
                                tokio::time::Instant::from_std(d),
                                waiter.notify.notified(),
                            )
                            .await
                            .is_err()
                        }
                        None => {
                            waiter.notify.notified().await;
                            false
                        }
                    };

                    let mut state = self.state.lock();
                    state.counters.wait_time += wait_start.elapsed();
                    let was_queued = state.remove_waiter(&waiter);
                    if lapsed && !was_queued && !state.idle.is_empty() {
                        // We consumed a wakeup we cannot use; pass it on.
                        state.signal_one_waiter();
                    }
                    self.check_admission(&state)?;
                    if lapsed {
                        return Err(self.timeout_error(&state, start.elapsed()));
                    }
                }
            }
        }
    }

    /// Direct creation by the borrowing caller. Returns `Ok(None)` when
    /// the freshly created resource could not be admitted (capacity
    /// filled up while it was being opened).
    async fn create_direct(
        self: &Arc<Self>,
        _deadline: Option<Instant>,
    ) -> Result<Option<Holder<F::Resource>>> {
        let opened = self.factory.open().await;

        match opened {
            Ok(resource) => {
                let mut holder = self.new_holder(resource);
                let admitted = {
                    let mut state = self.state.lock();
                    state.creating_direct = false;
                    state.creating_count -= 1;
                    state.counters.create_count += 1;
                    state.lifetime_create_count += 1;
                    if !state.closed && !state.closing && state.total() < state.max_active() {
                        state.mark_borrowed(&mut holder);
                        true
                    } else {
                        false
                    }
                };
                if admitted {
                    tracing::debug!(holder = holder.id, "resource created directly by borrower");
                    Ok(Some(holder))
                } else {
                    self.destroy_resource(holder.into_resource()).await;
                    Ok(None)
                }
            }
            Err(error) => {
                {
                    let mut state = self.state.lock();
                    state.creating_direct = false;
                    state.creating_count -= 1;
                    state.counters.create_error_count += 1;
                    state.last_create_error = Some(error.to_string());
                }
                Err(PoolError::Creation(Box::new(error)))
            }
        }
    }

    fn wrap_handle(self: &Arc<Self>, holder: Holder<F::Resource>) -> PooledHandle<F> {
        let backtrace = if self.config.remove_abandoned && self.config.log_abandoned {
            Some(Backtrace::force_capture())
        } else {
            None
        };
        let shared = Arc::new(HandleShared {
            id: holder.id,
            borrowed_at: Instant::now(),
            owner: std::thread::current().name().unwrap_or("unnamed").to_string(),
            running: AtomicBool::new(false),
            trace: AtomicBool::new(false),
            backtrace,
            slot: tokio::sync::Mutex::new(HandleSlot {
                holder: Some(holder),
                disabled: false,
                txn_started: None,
            }),
        });
        if self.config.remove_abandoned {
            shared.trace.store(true, Ordering::Relaxed);
            self.leak.register(shared.clone());
        }
        PooledHandle {
            shared,
            pool: self.clone(),
            returned: false,
        }
    }

    // ------------------------------------------------------------------
    // Recycle protocol
    // ------------------------------------------------------------------

    /// Entry point from handle close/drop. Idempotent.
    pub(crate) async fn recycle_shared(self: &Arc<Self>, shared: &Arc<HandleShared<F::Resource>>) {
        if shared.trace.swap(false, Ordering::Relaxed) {
            self.leak.deregister(shared.id);
        }
        let (holder, txn_started) = {
            let mut slot = shared.slot.lock().await;
            (slot.holder.take(), slot.txn_started.take())
        };
        let Some(holder) = holder else {
            // Double close is a no-op.
            return;
        };
        self.recycle_holder(holder, txn_started).await;
    }

    /// The recycle protocol proper. Never fails from the caller's
    /// perspective: every error path force-discards the resource.
    pub(crate) async fn recycle_holder(
        self: &Arc<Self>,
        mut holder: Holder<F::Resource>,
        txn_started: Option<Instant>,
    ) {
        if !self.interceptors.is_empty()
            && self.interceptors.on_recycle(&mut holder.resource).await == RecycleDecision::Discard
        {
            let _ = self.discard_holder(holder).await;
            return;
        }

        // Roll back an open read-write transaction before anything else.
        if holder.resource.in_transaction() && !holder.resource.is_read_only() {
            let txn_elapsed = txn_started.map(|t| t.elapsed());
            match holder.resource.rollback().await {
                Ok(()) => {
                    if let Some(duration) = txn_elapsed {
                        let mut state = self.state.lock();
                        state.counters.record_transaction(duration);
                        drop(state);
                        if self
                            .config
                            .slow_transaction_threshold
                            .is_some_and(|limit| duration > limit)
                        {
                            tracing::warn!(
                                holder = holder.id,
                                duration_ms = duration.as_millis() as u64,
                                "slow transaction rolled back at recycle"
                            );
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(holder = holder.id, error = %error, "rollback failed at recycle");
                    self.force_discard(holder).await;
                    return;
                }
            }
        }

        // Restore session defaults.
        if let Err(error) = holder.resource.reset().await {
            tracing::warn!(holder = holder.id, error = %error, "session reset failed at recycle");
            self.force_discard(holder).await;
            return;
        }

        if holder.discard {
            self.destroy_holder(holder).await;
            return;
        }

        if let Some(max_uses) = self.config.max_uses_per_resource {
            if holder.use_count >= max_uses {
                tracing::debug!(
                    holder = holder.id,
                    use_count = holder.use_count,
                    "resource reached max uses"
                );
                let _ = self.discard_holder(holder).await;
                return;
            }
        }

        if holder.resource.is_closed() {
            self.destroy_holder(holder).await;
            return;
        }

        if self.config.test_on_return && !self.validator.probe(&mut holder.resource).await {
            tracing::debug!(holder = holder.id, "return-time validation failed");
            self.destroy_holder(holder).await;
            return;
        }

        if holder.is_expired(self.config.max_lifetime) {
            tracing::debug!(holder = holder.id, "resource exceeded max lifetime");
            let _ = self.discard_holder(holder).await;
            return;
        }

        let enabled = self.state.lock().enabled;
        if !enabled {
            let _ = self.discard_holder(holder).await;
            return;
        }

        let rejected = {
            let mut state = self.state.lock();
            if holder.active {
                state.active_count -= 1;
                holder.active = false;
            }
            state.counters.recycle_count += 1;
            state.put(holder, true).err()
        };
        if let Some(holder) = rejected {
            tracing::info!(holder = holder.id, "resource recycle refused, closing");
            self.destroy_resource(holder.into_resource()).await;
        }
    }

    /// Recovery path for recycle errors: cache cleared, resource
    /// force-discarded, error counted, nothing surfaced.
    async fn force_discard(self: &Arc<Self>, holder: Holder<F::Resource>) {
        holder.clear_cache();
        self.state.lock().counters.recycle_error_count += 1;
        let _ = self.discard_holder(holder).await;
    }

    // ------------------------------------------------------------------
    // Discard / destroy
    // ------------------------------------------------------------------

    /// Physically close a resource that is already outside all
    /// accounting except the destroy counter.
    pub(crate) async fn destroy_resource(&self, resource: F::Resource) {
        {
            let mut state = self.state.lock();
            state.counters.destroy_count += 1;
        }
        self.factory.close(resource).await;
    }

    /// Close a resource still carrying active accounting, without
    /// discard-policy bookkeeping (used when the resource is already
    /// dead: closed underneath us or failed return validation).
    pub(crate) async fn destroy_holder(&self, mut holder: Holder<F::Resource>) {
        {
            let mut state = self.state.lock();
            if holder.active {
                state.active_count -= 1;
                holder.active = false;
            }
            state.counters.destroy_count += 1;
        }
        self.factory.close(holder.into_resource()).await;
    }

    /// Discard a resource by policy: update counters under the mutex,
    /// signal replenishment when the working set dropped under
    /// `min_idle`, then close outside the mutex. Returns whether a
    /// replenishment signal was sent.
    pub(crate) async fn discard_holder(self: &Arc<Self>, mut holder: Holder<F::Resource>) -> bool {
        holder.discard = true;
        holder.clear_cache();
        let signaled = {
            let mut state = self.state.lock();
            if holder.active {
                state.active_count -= 1;
                holder.active = false;
            }
            state.counters.discard_count += 1;
            state.counters.destroy_count += 1;
            state.lifetime_discard_count += 1;
            let shortfall = self
                .config
                .min_idle
                .saturating_sub(state.total_with_pending());
            if shortfall > 0 {
                self.signal_empty_locked(&mut state, shortfall)
            } else {
                false
            }
        };
        self.factory.close(holder.into_resource()).await;
        signaled
    }

    // ------------------------------------------------------------------
    // Fatal errors
    // ------------------------------------------------------------------

    /// Classify a caller-reported resource error; on fatal, disable the
    /// handle, discard the resource, and advance the admission window.
    pub(crate) async fn handle_resource_error(
        self: &Arc<Self>,
        shared: &Arc<HandleShared<F::Resource>>,
        error: &F::Error,
    ) -> bool {
        if !self.classifier.is_fatal(error) {
            return false;
        }

        if shared.trace.swap(false, Ordering::Relaxed) {
            self.leak.deregister(shared.id);
        }
        let holder = {
            let mut slot = shared.slot.lock().await;
            slot.disabled = true;
            slot.holder.take()
        };

        let engaged = {
            let mut state = self.state.lock();
            state.last_fatal_time = Some(Instant::now());
            state.fatal_error_count += 1;
            if let Some(ceiling) = self.config.on_fatal_error_max_active {
                if state.fatal_error_count - state.fatal_count_last_shrink >= ceiling as u64 {
                    // Advance the window so shrink does not double-signal
                    // for this same episode.
                    state.fatal_count_last_shrink += 1;
                    if !state.on_fatal_error {
                        tracing::warn!(ceiling, "fatal-error admission control engaged");
                    }
                    state.on_fatal_error = true;
                } else {
                    state.on_fatal_error = false;
                }
            }
            state.on_fatal_error
        };

        match holder {
            Some(holder) => {
                tracing::error!(holder = holder.id, error = %error, "fatal resource error, discarding");
                let signaled = self.discard_holder(holder).await;
                if !signaled && engaged {
                    let mut state = self.state.lock();
                    self.signal_empty_locked(&mut state, 1);
                }
            }
            None => {
                if engaged {
                    let mut state = self.state.lock();
                    self.signal_empty_locked(&mut state, 1);
                }
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Detach / drop outside runtime
    // ------------------------------------------------------------------

    pub(crate) async fn detach_shared(
        &self,
        shared: &Arc<HandleShared<F::Resource>>,
    ) -> Result<F::Resource> {
        if shared.trace.swap(false, Ordering::Relaxed) {
            self.leak.deregister(shared.id);
        }
        let holder = {
            let mut slot = shared.slot.lock().await;
            slot.holder.take()
        };
        let holder = holder.ok_or(PoolError::StaleHandle)?;
        {
            let mut state = self.state.lock();
            if holder.active {
                state.active_count -= 1;
            }
        }
        tracing::debug!(holder = holder.id, "resource detached from pool");
        Ok(holder.into_resource())
    }

    /// Best-effort accounting when a handle is dropped with no runtime
    /// to run the recycle on. The resource's own Drop closes it.
    pub(crate) fn recycle_dropped_outside_runtime(&self, shared: &Arc<HandleShared<F::Resource>>) {
        if shared.trace.swap(false, Ordering::Relaxed) {
            self.leak.deregister(shared.id);
        }
        let Ok(mut slot) = shared.slot.try_lock() else {
            return;
        };
        let Some(holder) = slot.holder.take() else {
            return;
        };
        let mut state = self.state.lock();
        if holder.active {
            state.active_count -= 1;
        }
        state.counters.destroy_count += 1;
    }

    // ------------------------------------------------------------------
    // Creator signalling
    // ------------------------------------------------------------------

    /// The "empty" signal (§ replenishment): wake the dedicated creator,
    /// or spawn up to `fill` creation tasks under the task budget.
    /// Caller must hold the state lock. Returns whether anything was
    /// signalled.
    pub(crate) fn signal_empty_locked(
        self: &Arc<Self>,
        state: &mut StoreState<F::Resource>,
        fill: usize,
    ) -> bool {
        match self.config.create_strategy {
            CreateStrategy::DedicatedLoop => {
                if state.total() >= state.max_active() {
                    return false;
                }
                self.creator_notify.notify_one();
                true
            }
            CreateStrategy::TaskScheduled => {
                let mut signaled = false;
                for _ in 0..fill {
                    if state.total_with_pending() >= state.max_active()
                        || state.create_task_count >= self.config.max_create_task_count
                    {
                        break;
                    }
                    self.spawn_create_task(state, false);
                    signaled = true;
                }
                signaled
            }
        }
    }

    pub(crate) fn spawn_create_task(
        self: &Arc<Self>,
        state: &mut StoreState<F::Resource>,
        init_task: bool,
    ) {
        let task_id = self.task_seq.fetch_add(1, Ordering::Relaxed) + 1;
        state.create_task_count += 1;
        let core = self.clone();
        let handle = tokio::spawn(async move {
            creator::run_create_task(core, task_id, init_task).await;
        });
        let _ = state.create_tasks.insert(task_id, handle.abort_handle());
        tracing::trace!(task_id, "creation task scheduled");
    }

    /// Idempotently clear a pending creation task.
    pub(crate) fn clear_create_task(&self, state: &mut StoreState<F::Resource>, task_id: u64) {
        if state.create_tasks.remove(&task_id).is_some() {
            state.create_task_count = state.create_task_count.saturating_sub(1);
        }
    }

    /// Flip continuous-failure mode, logging transitions once.
    pub(crate) fn set_continuous_failure(
        &self,
        state: &mut StoreState<F::Resource>,
        value: bool,
    ) {
        if state.continuous_failure != value {
            state.continuous_failure = value;
            if value {
                tracing::error!("resource creation failing continuously");
            } else {
                tracing::info!("resource creation recovered");
            }
        }
    }
}
