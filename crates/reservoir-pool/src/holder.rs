//! Holder: pool-internal wrapper around one physical resource.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::statement_cache::{CacheCounters, StatementCache};

/// One physical resource plus its cache and usage metadata.
///
/// A holder is owned by exactly one place at a time: the idle stack, a
/// live handle, or a worker that has taken it out for probing or
/// teardown. The `active` and `discard` flags are only written under the
/// pool mutex; the statement cache has its own lock so cache traffic on
/// one resource never contends with borrow/recycle of others.
pub(crate) struct Holder<R> {
    pub(crate) id: u64,
    pub(crate) resource: R,
    pub(crate) created_at: Instant,
    pub(crate) last_active: Instant,
    pub(crate) last_keep_alive: Option<Instant>,
    pub(crate) use_count: u64,
    pub(crate) active: bool,
    pub(crate) discard: bool,
    pub(crate) cache: Mutex<StatementCache>,
}

impl<R> Holder<R> {
    pub(crate) fn new(
        id: u64,
        resource: R,
        cache_capacity: usize,
        counters: Arc<CacheCounters>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            resource,
            created_at: now,
            last_active: now,
            last_keep_alive: None,
            use_count: 0,
            active: false,
            discard: false,
            cache: Mutex::new(StatementCache::new(cache_capacity, counters)),
        }
    }

    /// Physical age of the resource.
    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the resource has outlived `max_lifetime`.
    pub(crate) fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|limit| self.age() > limit)
    }

    /// Time since the resource was last returned or handed out.
    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }

    /// Time since the last successful keep-alive probe, or since the
    /// resource was last active if it has never been probed.
    pub(crate) fn since_keep_alive(&self, now: Instant) -> Duration {
        let reference = self.last_keep_alive.unwrap_or(self.last_active);
        now.saturating_duration_since(reference)
    }

    pub(crate) fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Consume the holder, releasing the physical resource to the
    /// caller. Cache and metadata are dropped with the holder.
    pub(crate) fn into_resource(self) -> R {
        self.resource
    }
}

impl<R> std::fmt::Debug for Holder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Holder")
            .field("id", &self.id)
            .field("use_count", &self.use_count)
            .field("active", &self.active)
            .field("discard", &self.discard)
            .finish()
    }
}
