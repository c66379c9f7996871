//! Background resource creation.
//!
//! Two interchangeable strategies, selected by
//! [`CreateStrategy`](crate::config::CreateStrategy):
//!
//! - **Dedicated loop** ([`run_dedicated`]): one long-lived worker
//!   blocks on the empty signal, with a periodic tick so it makes
//!   independent progress, and creates one resource at a time.
//! - **Task-scheduled** ([`run_create_task`]): replenishment runs as
//!   discrete cancellable tasks, each with a retry budget and an
//!   inter-error delay instead of busy-retrying.
//!
//! Both share failure handling: every factory error counts and retries;
//! exceeding the retry budget flips the pool into continuous-failure
//! mode (optionally waking all waiters so fail-fast borrows error out),
//! and a successful creation clears it.

use std::sync::Arc;
use std::time::Duration;

use reservoir_core::ResourceFactory;

use crate::pool::PoolCore;

/// Periodic tick for the dedicated creator, so a lost signal only
/// delays replenishment instead of stalling it.
const CREATOR_WAIT_TICK: Duration = Duration::from_secs(5);

enum WaitKind {
    AtCapacity,
    Wait,
    Create,
}

/// The dedicated creation loop.
pub(crate) async fn run_dedicated<F: ResourceFactory>(core: Arc<PoolCore<F>>) {
    tracing::debug!("creator worker started");
    let mut error_count: u32 = 0;
    let mut last_discard_count: u64 = 0;

    loop {
        let wait = {
            let state = core.state.lock();
            if state.closing || state.closed {
                break;
            }

            let discard_changed = state.lifetime_discard_count > last_discard_count;
            last_discard_count = state.lifetime_discard_count;

            // Waiting is only allowed when nobody needs a resource:
            // skip it during warm-up, keep-alive deficit, after a
            // creation error, after a discard burst, and in
            // continuous-failure mode (so creation keeps retrying to
            // clear the failure state).
            let mut empty_wait = state.last_create_error.is_none()
                || !state.idle.is_empty()
                || discard_changed;
            if empty_wait
                && core.config.async_init
                && state.lifetime_create_count < core.config.initial_size as u64
            {
                empty_wait = false;
            }

            if state.total() >= state.max_active() {
                WaitKind::AtCapacity
            } else if empty_wait
                && state.idle.len() >= state.waiting_count()
                && !(core.config.keep_alive && state.total() < core.config.min_idle)
                && !state.continuous_failure
            {
                WaitKind::Wait
            } else {
                WaitKind::Create
            }
        };

        match wait {
            WaitKind::AtCapacity | WaitKind::Wait => {
                let _ =
                    tokio::time::timeout(CREATOR_WAIT_TICK, core.creator_notify.notified()).await;
                continue;
            }
            WaitKind::Create => {}
        }

        core.state.lock().creating_count += 1;
        match core.factory.open().await {
            Ok(resource) => {
                let holder = core.new_holder(resource);
                let rejected = {
                    let mut state = core.state.lock();
                    state.creating_count -= 1;
                    state.counters.create_count += 1;
                    state.lifetime_create_count += 1;
                    state.last_create_error = None;
                    core.set_continuous_failure(&mut state, false);
                    state.put(holder, false).err()
                };
                if let Some(holder) = rejected {
                    tracing::info!("created resource not admitted, closing");
                    core.destroy_resource(holder.into_resource()).await;
                }
                error_count = 0;
            }
            Err(error) => {
                {
                    let mut state = core.state.lock();
                    state.creating_count -= 1;
                    state.counters.create_error_count += 1;
                    state.last_create_error = Some(error.to_string());
                }
                tracing::error!(error = %error, "resource creation failed");
                error_count += 1;
                if error_count > core.config.connect_error_retry_attempts
                    && !core.config.time_between_connect_errors.is_zero()
                {
                    {
                        let mut state = core.state.lock();
                        core.set_continuous_failure(&mut state, true);
                        if core.config.fail_fast {
                            state.signal_all_waiters();
                        }
                    }
                    tokio::time::sleep(core.config.time_between_connect_errors).await;
                }
            }
        }
    }
    tracing::debug!("creator worker stopped");
}

/// One task-scheduled creation attempt, retried in place with a delay
/// once the retry budget is exhausted. The task id keeps pending-task
/// bookkeeping cancellable and idempotent.
pub(crate) async fn run_create_task<F: ResourceFactory>(
    core: Arc<PoolCore<F>>,
    task_id: u64,
    init_task: bool,
) {
    let mut error_count: u32 = 0;
    loop {
        {
            let mut state = core.state.lock();
            if state.closing || state.closed {
                core.clear_create_task(&mut state, task_id);
                return;
            }

            // Give up only when nothing needs this resource. Warm-up
            // tasks, continuous failure, and fatal-error episodes keep
            // creating regardless so the pool can recover.
            let empty_wait = state.last_create_error.is_none() || !state.idle.is_empty();
            if empty_wait
                && state.idle.len() >= state.waiting_count()
                && !(core.config.keep_alive && state.total() < core.config.min_idle)
                && !init_task
                && !state.continuous_failure
                && !state.on_fatal_error
            {
                core.clear_create_task(&mut state, task_id);
                return;
            }

            if state.total() >= state.max_active() {
                core.clear_create_task(&mut state, task_id);
                return;
            }
        }

        match core.factory.open().await {
            Ok(resource) => {
                let holder = core.new_holder(resource);
                let rejected = {
                    let mut state = core.state.lock();
                    state.counters.create_count += 1;
                    state.lifetime_create_count += 1;
                    state.last_create_error = None;
                    core.set_continuous_failure(&mut state, false);
                    let rejected = state.put(holder, false).err();
                    core.clear_create_task(&mut state, task_id);
                    if rejected.is_none()
                        && state.idle.len() + state.create_task_count < state.waiting_count()
                    {
                        // Still more waiters than supply lined up.
                        let _ = core.signal_empty_locked(&mut state, 1);
                    }
                    rejected
                };
                if let Some(holder) = rejected {
                    tracing::info!(task_id, "created resource not admitted, closing");
                    core.destroy_resource(holder.into_resource()).await;
                }
                return;
            }
            Err(error) => {
                {
                    let mut state = core.state.lock();
                    state.counters.create_error_count += 1;
                    state.last_create_error = Some(error.to_string());
                }
                tracing::error!(task_id, error = %error, "resource creation failed");
                error_count += 1;
                if error_count > core.config.connect_error_retry_attempts
                    && !core.config.time_between_connect_errors.is_zero()
                {
                    let stop = {
                        let mut state = core.state.lock();
                        core.set_continuous_failure(&mut state, true);
                        if core.config.fail_fast {
                            state.signal_all_waiters();
                        }
                        state.closing || state.closed
                    };
                    if stop {
                        let mut state = core.state.lock();
                        core.clear_create_task(&mut state, task_id);
                        return;
                    }
                    // Self-limiting backoff: sleep out the inter-error
                    // delay instead of hammering the backend.
                    tokio::time::sleep(core.config.time_between_connect_errors).await;
                    error_count = 0;
                }
            }
        }
    }
}
