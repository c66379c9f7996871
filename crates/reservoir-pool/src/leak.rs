//! Borrowed-handle tracking for leak detection.
//!
//! When `remove_abandoned` is enabled every borrow registers its handle
//! here. The evictor scans the table each cycle and reclaims handles
//! whose lease has outlived the configured timeout and that are not
//! flagged in active use.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;

use crate::handle::HandleShared;

pub(crate) struct LeakTable<R> {
    entries: Mutex<HashMap<u64, Arc<HandleShared<R>>>>,
}

impl<R> Default for LeakTable<R> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<R> LeakTable<R> {
    pub(crate) fn register(&self, shared: Arc<HandleShared<R>>) {
        let _ = self.entries.lock().insert(shared.id, shared);
    }

    pub(crate) fn deregister(&self, id: u64) {
        let _ = self.entries.lock().remove(&id);
    }

    /// Remove and return every tracked handle whose lease exceeds
    /// `timeout` and that is not flagged in active use.
    pub(crate) fn collect_expired(&self, timeout: Duration) -> Vec<Arc<HandleShared<R>>> {
        let mut entries = self.entries.lock();
        if entries.is_empty() {
            return Vec::new();
        }

        let expired: Vec<u64> = entries
            .values()
            .filter(|shared| {
                !shared.running.load(Ordering::Relaxed) && shared.borrowed_at.elapsed() >= timeout
            })
            .map(|shared| shared.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| {
                entries.remove(&id).inspect(|shared| {
                    shared.trace.store(false, Ordering::Relaxed);
                })
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::handle::HandleSlot;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    fn shared(id: u64) -> Arc<HandleShared<()>> {
        Arc::new(HandleShared {
            id,
            borrowed_at: Instant::now(),
            owner: "test".into(),
            running: AtomicBool::new(false),
            trace: AtomicBool::new(true),
            backtrace: None,
            slot: tokio::sync::Mutex::new(HandleSlot {
                holder: None,
                disabled: false,
                txn_started: None,
            }),
        })
    }

    #[test]
    fn register_and_deregister() {
        let table = LeakTable::default();
        table.register(shared(1));
        assert_eq!(table.len(), 1);
        table.deregister(1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn collect_expired_skips_running_handles() {
        let table = LeakTable::default();
        let busy = shared(1);
        busy.running.store(true, Ordering::Relaxed);
        table.register(busy);
        table.register(shared(2));

        std::thread::sleep(Duration::from_millis(5));
        let expired = table.collect_expired(Duration::from_millis(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, 2);
        // The running handle stays tracked.
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn collect_expired_honors_timeout() {
        let table = LeakTable::default();
        table.register(shared(1));
        assert!(table.collect_expired(Duration::from_secs(60)).is_empty());
        assert_eq!(table.len(), 1);
    }
}
