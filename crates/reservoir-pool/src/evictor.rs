//! The evictor: periodic shrink, keep-alive probing, abandoned-handle
//! reclamation, and the stats reporter loop.
//!
//! A shrink pass scans the idle stack from the oldest end under the pool
//! mutex, classifying each holder as retain / evict / keep-alive, then
//! compacts the stack in place (stable order). All I/O — closing evicted
//! resources and probing keep-alive candidates — happens outside the
//! mutex; the pass re-acquires it only to finalize counters and signal
//! the creator for any shortfall.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use reservoir_core::ResourceFactory;

use crate::config::MIN_EVICTION_INTERVAL;
use crate::holder::Holder;
use crate::pool::PoolCore;

enum Action {
    Retain,
    Evict,
    KeepAlive,
}

/// The periodic evictor worker.
pub(crate) async fn run<F: ResourceFactory>(core: Arc<PoolCore<F>>) {
    let period = core.config.eviction_interval.max(MIN_EVICTION_INTERVAL);
    tracing::debug!(period_ms = period.as_millis() as u64, "evictor started");
    loop {
        tokio::time::sleep(period).await;
        if core.is_closed() {
            break;
        }
        shrink(&core, true).await;
        if core.config.remove_abandoned {
            let _ = reclaim_abandoned(&core).await;
        }
    }
    tracing::debug!("evictor stopped");
}

/// The periodic stats reporter worker.
pub(crate) async fn run_stats<F: ResourceFactory>(core: Arc<PoolCore<F>>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if core.is_closed() {
            break;
        }
        let stats = core.take_stats();
        core.sink.record(&stats);
    }
}

/// One shrink pass. `check_time` selects the age/idle-time policy; when
/// false only the excess above `min_idle` is trimmed.
pub(crate) async fn shrink<F: ResourceFactory>(core: &Arc<PoolCore<F>>, check_time: bool) {
    let now = Instant::now();

    let (mut evict, keep_alive, mut need_fill, fatal_increment) = {
        let mut state = core.state.lock();
        if state.closed || state.closing {
            return;
        }

        let fatal_increment = state.fatal_error_count - state.fatal_count_last_shrink;
        state.fatal_count_last_shrink = state.fatal_error_count;
        if fatal_increment == 0 && state.on_fatal_error {
            // A quiet window since the last pass lifts admission control.
            state.on_fatal_error = false;
            tracing::info!("fatal-error admission control disengaged");
        }

        if state.idle.is_empty() {
            if fatal_increment > 0 {
                let _ = core.signal_empty_locked(&mut state, 1);
            }
            return;
        }

        let check_count = state.idle.len().saturating_sub(core.config.min_idle);
        let mut actions: Vec<Action> = Vec::with_capacity(state.idle.len());
        for (i, holder) in state.idle.iter().enumerate() {
            // A holder that predates a fatal episode must be
            // health-checked before it can be trusted again.
            if (state.on_fatal_error || fatal_increment > 0)
                && state.last_fatal_time.is_some_and(|t| t > holder.created_at)
            {
                actions.push(Action::KeepAlive);
                continue;
            }

            if check_time {
                if holder.is_expired(core.config.max_lifetime) {
                    actions.push(Action::Evict);
                    continue;
                }
                let idle = holder.idle_for(now);
                if idle < core.config.min_evictable_idle && idle < core.config.keep_alive_interval {
                    // Oldest-first scan: everything past this point is
                    // younger still.
                    break;
                }
                if idle >= core.config.min_evictable_idle {
                    if i < check_count {
                        actions.push(Action::Evict);
                        continue;
                    }
                    if idle > core.config.max_evictable_idle {
                        actions.push(Action::Evict);
                        continue;
                    }
                }
                if core.config.keep_alive
                    && idle >= core.config.keep_alive_interval
                    && holder.since_keep_alive(now) >= core.config.keep_alive_interval
                {
                    actions.push(Action::KeepAlive);
                } else {
                    actions.push(Action::Retain);
                }
            } else if i < check_count {
                actions.push(Action::Evict);
            } else {
                break;
            }
        }

        let mut evict: Vec<Holder<F::Resource>> = Vec::new();
        let mut keep_alive: Vec<Holder<F::Resource>> = Vec::new();
        let mut retained: Vec<Holder<F::Resource>> = Vec::with_capacity(state.idle.len());
        for (i, holder) in state.idle.drain(..).enumerate() {
            match actions.get(i) {
                Some(Action::Evict) => evict.push(holder),
                Some(Action::KeepAlive) => keep_alive.push(holder),
                // Stable compaction: retained holders keep their order.
                Some(Action::Retain) | None => retained.push(holder),
            }
        }
        state.idle = retained;
        state.counters.keep_alive_check_count += keep_alive.len() as u64;

        let need_fill = core.config.keep_alive && state.total() < core.config.min_idle;
        (evict, keep_alive, need_fill, fatal_increment)
    };

    let evicted = evict.len();
    for holder in evict.drain(..) {
        tracing::debug!(holder = holder.id, "evicting idle resource");
        holder.clear_cache();
        core.destroy_resource(holder.into_resource()).await;
    }

    let mut kept = 0usize;
    let mut dropped = 0usize;
    // Probe in reverse scan order so re-inserts preserve recency.
    for mut holder in keep_alive.into_iter().rev() {
        if core.validator.probe(&mut holder.resource).await {
            holder.last_keep_alive = Some(Instant::now());
            let rejected = {
                let mut state = core.state.lock();
                state.put(holder, false).err()
            };
            match rejected {
                None => kept += 1,
                Some(holder) => {
                    // Capacity filled while the probe ran.
                    discard_probed(core, holder, &mut need_fill).await;
                    dropped += 1;
                }
            }
        } else {
            tracing::debug!(holder = holder.id, "keep-alive probe failed");
            discard_probed(core, holder, &mut need_fill).await;
            dropped += 1;
        }
    }

    if need_fill {
        let mut state = core.state.lock();
        let shortfall = core
            .config
            .min_idle
            .saturating_sub(state.total_with_pending());
        if shortfall > 0 {
            let _ = core.signal_empty_locked(&mut state, shortfall);
        }
    } else if fatal_increment > 0 {
        // The episode likely killed idle resources logically without
        // discarding them yet; replenish regardless of min_idle.
        let mut state = core.state.lock();
        let _ = core.signal_empty_locked(&mut state, 1);
    }

    if evicted > 0 || kept > 0 || dropped > 0 {
        tracing::debug!(
            evicted,
            kept_alive = kept,
            dropped,
            "shrink pass complete"
        );
    }
}

/// Discard a keep-alive candidate that failed its probe or lost the
/// capacity race. The holder is already outside the idle stack and was
/// never active, so only discard bookkeeping applies.
async fn discard_probed<F: ResourceFactory>(
    core: &Arc<PoolCore<F>>,
    mut holder: Holder<F::Resource>,
    need_fill: &mut bool,
) {
    holder.discard = true;
    holder.clear_cache();
    {
        let mut state = core.state.lock();
        state.counters.discard_count += 1;
        state.counters.destroy_count += 1;
        state.lifetime_discard_count += 1;
        if state.total_with_pending() < core.config.min_idle {
            *need_fill = true;
        }
    }
    core.factory.close(holder.into_resource()).await;
}

/// Scan the leak table and force-close handles held past the abandoned
/// timeout that are not flagged in active use. Returns the number
/// reclaimed.
pub(crate) async fn reclaim_abandoned<F: ResourceFactory>(core: &Arc<PoolCore<F>>) -> u64 {
    let expired = core.leak.collect_expired(core.config.abandoned_timeout);
    let mut reclaimed = 0u64;

    for shared in expired {
        let taken = match shared.slot.try_lock() {
            Ok(mut slot) => {
                let holder = slot.holder.take();
                let txn_started = slot.txn_started.take();
                if holder.is_some() {
                    slot.disabled = true;
                }
                holder.map(|h| (h, txn_started))
            }
            Err(_) => {
                // Someone is touching the handle right now; put it back
                // for the next pass.
                shared.trace.store(true, Ordering::Relaxed);
                core.leak.register(shared.clone());
                continue;
            }
        };
        let Some((holder, txn_started)) = taken else {
            continue;
        };

        tracing::error!(
            handle = shared.id,
            owner = %shared.owner,
            lease_ms = shared.borrowed_at.elapsed().as_millis() as u64,
            "reclaiming abandoned handle"
        );
        if core.config.log_abandoned {
            if let Some(backtrace) = &shared.backtrace {
                tracing::error!(
                    handle = shared.id,
                    "abandoned handle acquired at:\n{backtrace}"
                );
            }
        }

        core.recycle_holder(holder, txn_started).await;
        core.state.lock().counters.abandoned_count += 1;
        reclaimed += 1;
    }

    if reclaimed > 0 {
        tracing::info!(reclaimed, "abandoned handles reclaimed");
    }
    reclaimed
}
