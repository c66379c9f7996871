//! Per-holder pooled statement cache with LRU eviction.
//!
//! Each holder carries a bounded cache of server-side prepared statement
//! handles so repeated statements skip the prepare round trip. Entries
//! are keyed by normalized statement text plus the requested result-set
//! shape: the same text prepared with different cursor capabilities is a
//! different server-side object.
//!
//! ## Lifecycle
//!
//! 1. First execution of a statement records the server-assigned handle
//! 2. Subsequent executions look the handle up by key
//! 3. When the cache is full, LRU eviction releases the oldest handle
//! 4. Discarding the holder (or resetting its session) clears the cache;
//!    the server releases handles when the physical resource closes

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use lru::LruCache;

/// Cursor capabilities a statement was prepared with.
///
/// Part of the cache key: handles prepared for scrollable or updatable
/// result sets cannot serve plain forward-only execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResultShape {
    /// Result set supports scrolling.
    pub scrollable: bool,
    /// Result set supports positioned updates.
    pub updatable: bool,
}

/// A cached pooled statement.
#[derive(Debug, Clone)]
pub struct PooledStatement {
    /// Server-assigned handle for this statement.
    handle: i64,
    /// Normalized statement text.
    text: String,
    /// Result-set shape the statement was prepared with.
    shape: ResultShape,
    /// When this statement was prepared.
    created_at: Instant,
}

impl PooledStatement {
    /// Create a cached statement record.
    pub fn new(handle: i64, text: impl Into<String>, shape: ResultShape) -> Self {
        Self {
            handle,
            text: normalize(&text.into()),
            shape,
            created_at: Instant::now(),
        }
    }

    /// Server-assigned handle.
    #[must_use]
    pub fn handle(&self) -> i64 {
        self.handle
    }

    /// Normalized statement text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Result-set shape.
    #[must_use]
    pub fn shape(&self) -> ResultShape {
        self.shape
    }

    /// Age of this cached statement.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

/// Shared hit/miss counters aggregated across every holder in a pool.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheCounters {
    /// Current hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Current miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Read both counters and reset them to zero.
    pub fn take(&self) -> (u64, u64) {
        (
            self.hits.swap(0, Ordering::Relaxed),
            self.misses.swap(0, Ordering::Relaxed),
        )
    }
}

/// LRU cache of pooled statements, scoped to one holder.
pub struct StatementCache {
    cache: Option<LruCache<u64, PooledStatement>>,
    counters: Arc<CacheCounters>,
}

impl StatementCache {
    /// Create a cache with the given capacity. Zero disables caching
    /// entirely (every lookup misses, inserts are dropped).
    #[must_use]
    pub fn new(capacity: usize, counters: Arc<CacheCounters>) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
            counters,
        }
    }

    /// Look up a statement handle, updating LRU order.
    pub fn get(&mut self, text: &str, shape: ResultShape) -> Option<i64> {
        let key = cache_key(text, shape);
        match self.cache.as_mut().and_then(|c| c.get(&key)) {
            Some(stmt) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(handle = stmt.handle, "statement cache hit");
                Some(stmt.handle)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a statement, returning the entry evicted to make room.
    pub fn insert(&mut self, stmt: PooledStatement) -> Option<PooledStatement> {
        let cache = self.cache.as_mut()?;
        let key = cache_key(&stmt.text, stmt.shape);
        let evicted = if cache.len() >= cache.cap().get() && !cache.contains(&key) {
            cache.pop_lru().map(|(_, old)| old)
        } else {
            None
        };
        cache.put(key, stmt);
        evicted
    }

    /// Remove a statement by key.
    pub fn remove(&mut self, text: &str, shape: ResultShape) -> Option<PooledStatement> {
        let key = cache_key(text, shape);
        self.cache.as_mut().and_then(|c| c.pop(&key))
    }

    /// Drop every cached statement.
    pub fn clear(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            let count = cache.len();
            cache.clear();
            if count > 0 {
                tracing::debug!(count, "cleared statement cache");
            }
        }
    }

    /// Number of cached statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, LruCache::len)
    }

    /// Whether the cache holds no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("len", &self.len())
            .field("enabled", &self.cache.is_some())
            .finish()
    }
}

/// Normalize statement text for cache lookup: trim and collapse runs of
/// whitespace so formatting differences hit the same entry.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

fn cache_key(text: &str, shape: ResultShape) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalize(text).hash(&mut hasher);
    shape.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> (StatementCache, Arc<CacheCounters>) {
        let counters = Arc::new(CacheCounters::default());
        (StatementCache::new(capacity, counters.clone()), counters)
    }

    #[test]
    fn insert_and_get() {
        let (mut cache, counters) = cache(4);
        cache.insert(PooledStatement::new(
            7,
            "SELECT * FROM t",
            ResultShape::default(),
        ));

        assert_eq!(cache.get("SELECT * FROM t", ResultShape::default()), Some(7));
        assert_eq!(counters.hits(), 1);
        assert_eq!(counters.misses(), 0);
    }

    #[test]
    fn miss_counts() {
        let (mut cache, counters) = cache(4);
        assert_eq!(cache.get("SELECT 1", ResultShape::default()), None);
        assert_eq!(counters.misses(), 1);
    }

    #[test]
    fn normalization_hits_across_formatting() {
        let (mut cache, _) = cache(4);
        cache.insert(PooledStatement::new(
            1,
            "SELECT  *\n  FROM t ",
            ResultShape::default(),
        ));
        assert_eq!(cache.get("SELECT * FROM t", ResultShape::default()), Some(1));
    }

    #[test]
    fn shape_is_part_of_the_key() {
        let (mut cache, _) = cache(4);
        let scrollable = ResultShape {
            scrollable: true,
            updatable: false,
        };
        cache.insert(PooledStatement::new(1, "SELECT 1", ResultShape::default()));
        cache.insert(PooledStatement::new(2, "SELECT 1", scrollable));

        assert_eq!(cache.get("SELECT 1", ResultShape::default()), Some(1));
        assert_eq!(cache.get("SELECT 1", scrollable), Some(2));
    }

    #[test]
    fn lru_eviction_returns_oldest() {
        let (mut cache, _) = cache(2);
        cache.insert(PooledStatement::new(1, "SELECT 1", ResultShape::default()));
        cache.insert(PooledStatement::new(2, "SELECT 2", ResultShape::default()));

        // Touch the first entry so the second becomes LRU.
        cache.get("SELECT 1", ResultShape::default());

        let evicted = cache.insert(PooledStatement::new(
            3,
            "SELECT 3",
            ResultShape::default(),
        ));
        assert_eq!(evicted.unwrap().handle(), 2);
        assert_eq!(cache.get("SELECT 1", ResultShape::default()), Some(1));
        assert_eq!(cache.get("SELECT 2", ResultShape::default()), None);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let (mut cache, counters) = cache(0);
        assert!(
            cache
                .insert(PooledStatement::new(1, "SELECT 1", ResultShape::default()))
                .is_none()
        );
        assert_eq!(cache.get("SELECT 1", ResultShape::default()), None);
        assert_eq!(counters.misses(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties_the_cache() {
        let (mut cache, _) = cache(4);
        cache.insert(PooledStatement::new(1, "SELECT 1", ResultShape::default()));
        cache.insert(PooledStatement::new(2, "SELECT 2", ResultShape::default()));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn counters_take_resets() {
        let (mut cache, counters) = cache(4);
        cache.insert(PooledStatement::new(1, "SELECT 1", ResultShape::default()));
        cache.get("SELECT 1", ResultShape::default());
        cache.get("SELECT 2", ResultShape::default());

        assert_eq!(counters.take(), (1, 1));
        assert_eq!(counters.take(), (0, 0));
    }
}
