//! Pool integration tests.
//!
//! All tests run against the in-memory mock factory from
//! `reservoir-testing`, so they are deterministic and need no external
//! services.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reservoir_pool::{
    BorrowDecision, CreateStrategy, Interceptor, Pool, PoolConfig, PoolError, RecycleDecision,
    ResourceKind,
};
use reservoir_testing::{MockError, MockFactory, MockResource, MockValidator};

async fn build_pool(config: PoolConfig) -> (Pool<MockFactory>, MockFactory) {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(config)
        .validator(Arc::new(MockValidator))
        .build()
        .await
        .expect("pool should build");
    (pool, factory)
}

// =============================================================================
// Basic borrow / recycle
// =============================================================================

#[tokio::test]
async fn initial_fill_creates_resources_synchronously() {
    let (pool, factory) = build_pool(PoolConfig::new().initial_size(2).max_active(5)).await;

    assert_eq!(factory.opened(), 2);
    let status = pool.status();
    assert_eq!(status.idle, 2);
    assert_eq!(status.active, 0);

    pool.close().await;
}

#[tokio::test]
async fn borrow_and_return_round_trip() {
    let (pool, _factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let handle = pool.get().await.unwrap();
    assert_eq!(pool.status().active, 1);
    assert_eq!(handle.use_count().await.unwrap(), 1);
    handle.close().await;

    let handle = pool.get().await.unwrap();
    assert_eq!(
        handle.use_count().await.unwrap(),
        2,
        "use count should grow by exactly one per cycle"
    );
    handle.close().await;

    assert_eq!(pool.status().active, 0);
    assert_eq!(pool.status().idle, 1);
    pool.close().await;
}

#[tokio::test]
async fn idle_stack_is_lifo() {
    let (pool, _factory) = build_pool(PoolConfig::new().initial_size(2).max_active(2)).await;

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    let b_id = b.resource().await.unwrap().id();

    // Return a first, then b; the next borrow must see b.
    a.close().await;
    b.close().await;

    let next = pool.get().await.unwrap();
    assert_eq!(next.resource().await.unwrap().id(), b_id);
    next.close().await;
    pool.close().await;
}

#[tokio::test]
async fn dropping_a_handle_returns_it() {
    let (pool, _factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let handle = pool.get().await.unwrap();
    drop(handle);

    // Drop hands the recycle to a spawned task.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = pool.status();
    assert_eq!(status.active, 0);
    assert_eq!(status.idle, 1);
    pool.close().await;
}

#[tokio::test]
async fn try_get_never_waits() {
    let (pool, _factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let handle = pool.try_get().await.unwrap().expect("idle available");
    assert!(pool.try_get().await.unwrap().is_none());

    handle.close().await;
    assert!(pool.try_get().await.unwrap().is_some());
    pool.close().await;
}

#[tokio::test]
async fn detach_releases_the_capacity_slot() {
    let (pool, factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let handle = pool.get().await.unwrap();
    let resource = handle.detach().await.unwrap();
    assert!(resource.id() > 0);

    let status = pool.status();
    assert_eq!(status.active, 0, "detached resource leaves accounting");
    assert_eq!(status.idle, 0);

    // The slot is free again: a new resource can be created.
    let handle = pool.get_timeout(Duration::from_secs(2)).await.unwrap();
    assert_eq!(factory.opened(), 2);
    handle.close().await;
    pool.close().await;
}

// =============================================================================
// Capacity, waiting, timeout
// =============================================================================

#[tokio::test]
async fn borrows_up_to_capacity_then_times_out() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(2)
            .min_idle(2)
            .max_active(5)
            .max_wait(Duration::from_secs(2)),
    )
    .await;
    assert_eq!(factory.opened(), 2);

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(pool.get().await.expect("borrow within capacity"));
    }
    assert_eq!(pool.status().active, 5);

    let start = Instant::now();
    let result = pool.get_timeout(Duration::from_millis(100)).await;
    let elapsed = start.elapsed();

    match result {
        Err(PoolError::Timeout {
            active, max_active, ..
        }) => {
            assert_eq!(active, 5);
            assert_eq!(max_active, 5);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(1));

    for handle in handles {
        handle.close().await;
    }
    pool.close().await;
}

#[tokio::test]
async fn waiter_is_woken_by_a_return() {
    let (pool, _factory) = build_pool(
        PoolConfig::new()
            .initial_size(1)
            .max_active(1)
            .max_wait(Duration::from_secs(2)),
    )
    .await;

    let held = pool.get().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let handle = pool.get().await?;
            handle.close().await;
            Ok::<_, PoolError>(())
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    held.close().await;

    waiter.await.unwrap().expect("waiter should get the resource");
    pool.close().await;
}

#[tokio::test]
async fn wait_queue_bound_rejects_excess_waiters() {
    let (pool, _factory) = build_pool(
        PoolConfig::new()
            .initial_size(1)
            .max_active(1)
            .max_wait_thread_count(1),
    )
    .await;

    let held = pool.get().await.unwrap();
    let mut waiters = Vec::new();
    for _ in 0..2 {
        let pool = pool.clone();
        waiters.push(tokio::spawn(async move {
            pool.get_timeout(Duration::from_secs(5)).await.map(drop)
        }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = pool.get_timeout(Duration::from_millis(100)).await;
    assert!(
        matches!(result, Err(PoolError::WaitQueueFull { max: 1 })),
        "third waiter should be rejected, got {result:?}"
    );

    pool.close().await;
    for waiter in waiters {
        let _ = waiter.await;
    }
    held.close().await;
}

// =============================================================================
// Max uses per resource
// =============================================================================

#[tokio::test]
async fn max_uses_retires_the_resource() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(1)
            .max_active(1)
            .max_uses_per_resource(3),
    )
    .await;

    for round in 1..=3u64 {
        let handle = pool.get().await.unwrap();
        assert_eq!(handle.use_count().await.unwrap(), round);
        handle.close().await;
    }

    // The third recycle hits the use limit and discards instead of
    // returning to idle.
    assert_eq!(pool.status().idle, 0);
    assert_eq!(factory.closed(), 1);
    let stats = pool.take_stats();
    assert_eq!(stats.discard_count, 1);

    pool.close().await;
}

// =============================================================================
// Shrink
// =============================================================================

#[tokio::test]
async fn shrink_trims_idle_excess_toward_min_idle() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(4)
            .min_idle(1)
            .max_active(8)
            .min_evictable_idle(Duration::from_millis(50))
            .max_evictable_idle(Duration::from_secs(3600)),
    )
    .await;
    assert_eq!(pool.status().idle, 4);

    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shrink().await;

    // Exactly 3 evicted (the oldest), 1 retained.
    assert_eq!(pool.status().idle, 1);
    assert_eq!(factory.closed(), 3);

    // The retained holder is intact and borrowable.
    let handle = pool.get().await.unwrap();
    assert_eq!(handle.use_count().await.unwrap(), 1);
    handle.close().await;
    pool.close().await;
}

#[tokio::test]
async fn shrink_keeps_fresh_resources() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(3)
            .min_idle(1)
            .max_active(8)
            .min_evictable_idle(Duration::from_secs(60)),
    )
    .await;

    pool.shrink().await;
    assert_eq!(pool.status().idle, 3, "nothing idle long enough to evict");
    assert_eq!(factory.closed(), 0);
    pool.close().await;
}

#[tokio::test]
async fn shrink_evicts_past_max_lifetime() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(2)
            .max_active(4)
            .max_lifetime(Duration::from_millis(20)),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.shrink().await;

    assert_eq!(pool.status().idle, 0);
    assert_eq!(factory.closed(), 2);
    pool.close().await;
}

// =============================================================================
// Keep-alive
// =============================================================================

#[tokio::test]
async fn keep_alive_probes_and_retains_healthy_resources() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(2)
            .min_idle(2)
            .max_active(4)
            .keep_alive(true)
            .keep_alive_interval(Duration::from_millis(60))
            .eviction_interval(Duration::from_millis(50))
            .min_evictable_idle(Duration::from_secs(600))
            .max_evictable_idle(Duration::from_secs(3600)),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(90)).await;
    pool.shrink().await;

    assert_eq!(factory.probes(), 2, "both idle holders probed");
    assert_eq!(pool.status().idle, 2, "healthy holders re-inserted");
    assert_eq!(factory.closed(), 0);

    let stats = pool.take_stats();
    assert_eq!(stats.keep_alive_check_count, 2);
    pool.close().await;
}

#[tokio::test]
async fn keep_alive_discards_resources_that_fail_the_probe() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(2)
            .max_active(4)
            .keep_alive(true)
            .keep_alive_interval(Duration::from_millis(60))
            .eviction_interval(Duration::from_millis(50))
            .min_evictable_idle(Duration::from_secs(600)),
    )
    .await;

    factory.fail_probes(true);
    tokio::time::sleep(Duration::from_millis(90)).await;
    pool.shrink().await;

    assert_eq!(pool.status().idle, 0);
    assert_eq!(factory.closed(), 2);
    pool.close().await;
}

// =============================================================================
// Abandoned-handle reclamation
// =============================================================================

#[tokio::test]
async fn abandoned_handle_is_reclaimed_once() {
    let (pool, _factory) = build_pool(
        PoolConfig::new()
            .initial_size(1)
            .max_active(1)
            .remove_abandoned(Duration::from_millis(10)),
    )
    .await;

    let handle = pool.get().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(pool.reclaim_abandoned().await, 1);
    assert_eq!(pool.reclaim_abandoned().await, 0, "counted exactly once");

    let status = pool.status();
    assert_eq!(status.active, 0);
    assert_eq!(status.idle, 1, "reclaimed resource recovered for reuse");

    // The caller's own close is now a harmless no-op.
    handle.close().await;
    assert_eq!(pool.status().idle, 1);

    let stats = pool.take_stats();
    assert_eq!(stats.abandoned_count, 1);
    pool.close().await;
}

#[tokio::test]
async fn in_use_flag_protects_a_handle_from_reclamation() {
    let (pool, _factory) = build_pool(
        PoolConfig::new()
            .initial_size(1)
            .max_active(1)
            .remove_abandoned(Duration::from_millis(10)),
    )
    .await;

    let handle = pool.get().await.unwrap();
    handle.begin_work();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(pool.reclaim_abandoned().await, 0);
    assert_eq!(pool.status().active, 1);

    handle.end_work();
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert_eq!(pool.reclaim_abandoned().await, 1);

    handle.close().await;
    pool.close().await;
}

// =============================================================================
// Fatal errors and admission control
// =============================================================================

#[tokio::test]
async fn fatal_errors_engage_admission_control_until_a_quiet_shrink() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(
            PoolConfig::new()
                .initial_size(4)
                .max_active(5)
                .on_fatal_error_max_active(2),
        )
        .validator(Arc::new(MockValidator))
        .resource_kind(ResourceKind::Generic)
        .build()
        .await
        .unwrap();

    let h1 = pool.get().await.unwrap();
    let h2 = pool.get().await.unwrap();
    let _h3 = pool.get().await.unwrap();
    let _h4 = pool.get().await.unwrap();

    assert!(h1.report_error(&MockError::ConnectionLost).await);
    assert!(h2.report_error(&MockError::ConnectionLost).await);
    assert_eq!(pool.status().active, 2);

    // Two fatal errors with two still borrowed: at the ceiling, borrows
    // are rejected.
    let result = pool.get_timeout(Duration::from_millis(100)).await;
    assert!(
        matches!(
            result,
            Err(PoolError::AdmissionDenied {
                active: 2,
                ceiling: 2
            })
        ),
        "expected admission rejection, got {result:?}"
    );

    // First pass still observes the episode; the second is quiet and
    // lifts the throttle.
    pool.shrink().await;
    pool.shrink().await;

    let handle = pool.get_timeout(Duration::from_secs(2)).await.unwrap();
    handle.close().await;
    pool.close().await;
}

#[tokio::test]
async fn non_fatal_errors_leave_the_handle_usable() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(PoolConfig::new().initial_size(1).max_active(1))
        .resource_kind(ResourceKind::Generic)
        .build()
        .await
        .unwrap();

    let handle = pool.get().await.unwrap();
    assert!(!handle.report_error(&MockError::Statement).await);
    assert!(handle.resource().await.is_ok());
    handle.close().await;

    assert_eq!(pool.status().idle, 1);
    pool.close().await;
}

#[tokio::test]
async fn fatal_error_disables_the_handle() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(PoolConfig::new().initial_size(1).max_active(2))
        .resource_kind(ResourceKind::Generic)
        .build()
        .await
        .unwrap();

    let handle = pool.get().await.unwrap();
    assert!(handle.report_error(&MockError::ConnectionLost).await);

    assert!(matches!(
        handle.resource().await,
        Err(PoolError::StaleHandle)
    ));
    assert_eq!(factory.closed(), 1);
    handle.close().await;
    pool.close().await;
}

// =============================================================================
// Creation failure handling
// =============================================================================

#[tokio::test]
async fn fail_fast_surfaces_continuous_creation_failure() {
    let factory = MockFactory::new();
    factory.fail_all_opens(true);
    let pool = Pool::builder(factory.clone())
        .config(
            PoolConfig::new()
                .max_active(2)
                .fail_fast(true)
                .connect_error_retry_attempts(0)
                .time_between_connect_errors(Duration::from_millis(100)),
        )
        .build()
        .await
        .unwrap();

    let start = Instant::now();
    let result = pool.get_timeout(Duration::from_secs(5)).await;
    assert!(
        matches!(result, Err(PoolError::ContinuousFailure { .. })),
        "expected fail-fast, got {result:?}"
    );
    assert!(start.elapsed() < Duration::from_secs(2));

    // Once the backend recovers, creation clears the failure state.
    factory.fail_all_opens(false);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let handle = pool.get_timeout(Duration::from_secs(2)).await.unwrap();
    handle.close().await;
    pool.close().await;
}

#[tokio::test]
async fn creation_retries_through_transient_failures() {
    let factory = MockFactory::new();
    factory.fail_next_opens(2);
    let pool = Pool::builder(factory.clone())
        .config(
            PoolConfig::new()
                .max_active(1)
                .connect_error_retry_attempts(5),
        )
        .build()
        .await
        .unwrap();

    let handle = pool.get_timeout(Duration::from_secs(2)).await.unwrap();
    handle.close().await;

    let stats = pool.take_stats();
    assert_eq!(stats.create_error_count, 2);
    assert_eq!(stats.create_count, 1);
    pool.close().await;
}

// =============================================================================
// Task-scheduled creation and the direct-create fast path
// =============================================================================

#[tokio::test]
async fn task_scheduled_creation_serves_waiters() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(
            PoolConfig::new()
                .max_active(2)
                .create_strategy(CreateStrategy::TaskScheduled)
                .max_create_task_count(2),
        )
        .build()
        .await
        .unwrap();

    let handle = pool.get_timeout(Duration::from_secs(2)).await.unwrap();
    assert_eq!(factory.opened(), 1);
    handle.close().await;
    pool.close().await;
}

#[tokio::test]
async fn direct_creation_covers_bursty_demand() {
    let factory = MockFactory::new();
    factory.set_open_delay(Duration::from_millis(100));
    let pool = Pool::builder(factory.clone())
        .config(
            PoolConfig::new()
                .max_active(2)
                .create_strategy(CreateStrategy::TaskScheduled)
                .max_create_task_count(1),
        )
        .build()
        .await
        .unwrap();

    let first = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_timeout(Duration::from_secs(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The background task is still opening; this borrower takes the
    // single-slot direct path instead of queueing behind it.
    let second = pool.get_timeout(Duration::from_secs(2)).await.unwrap();

    let first = first.await.unwrap().unwrap();
    assert_eq!(factory.opened(), 2);
    assert_eq!(pool.status().active, 2);

    first.close().await;
    second.close().await;
    pool.close().await;
}

// =============================================================================
// Borrow/return validation
// =============================================================================

#[tokio::test]
async fn test_on_borrow_discards_unhealthy_resources() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(1)
            .max_active(2)
            .max_wait(Duration::from_secs(2))
            .test_on_borrow(true),
    )
    .await;

    let handle = pool.get().await.unwrap();
    let old_id = handle.resource().await.unwrap().id();
    handle.resource().await.unwrap().set_healthy(false);
    handle.close().await;
    assert_eq!(pool.status().idle, 1, "unhealthy but open, so recycled");

    // The next borrow probes, rejects it, and gets a fresh resource.
    let handle = pool.get().await.unwrap();
    assert_ne!(handle.resource().await.unwrap().id(), old_id);
    assert_eq!(factory.closed(), 1);
    handle.close().await;
    pool.close().await;
}

#[tokio::test]
async fn test_on_return_discards_unhealthy_resources() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(1)
            .max_active(1)
            .test_on_return(true),
    )
    .await;

    let handle = pool.get().await.unwrap();
    handle.resource().await.unwrap().set_healthy(false);
    handle.close().await;

    assert_eq!(pool.status().idle, 0);
    assert_eq!(factory.closed(), 1);
    pool.close().await;
}

#[tokio::test]
async fn dead_resource_is_not_recycled() {
    let (pool, _factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let handle = pool.get().await.unwrap();
    handle.resource().await.unwrap().kill();
    handle.close().await;

    assert_eq!(pool.status().idle, 0);
    assert_eq!(pool.status().active, 0);
    pool.close().await;
}

// =============================================================================
// Transactions at recycle
// =============================================================================

#[tokio::test]
async fn open_transaction_is_rolled_back_at_recycle() {
    let (pool, factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let handle = pool.get().await.unwrap();
    handle.note_transaction_begin().await;
    handle.resource().await.unwrap().begin_transaction(false);
    handle.close().await;

    assert_eq!(factory.rollbacks(), 1);
    let stats = pool.take_stats();
    let histogram_total: u64 = stats.transaction_histogram.iter().sum();
    assert_eq!(histogram_total, 1);

    pool.close().await;
}

#[tokio::test]
async fn read_only_transaction_is_not_rolled_back() {
    let (pool, factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let handle = pool.get().await.unwrap();
    handle.resource().await.unwrap().begin_transaction(true);
    handle.close().await;

    assert_eq!(factory.rollbacks(), 0);
    pool.close().await;
}

#[tokio::test]
async fn reset_failure_is_recovered_by_discarding() {
    let (pool, factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    factory.fail_resets(true);
    let handle = pool.get().await.unwrap();
    handle.close().await;

    // close() never fails; the resource was force-discarded instead.
    assert_eq!(pool.status().idle, 0);
    assert_eq!(factory.closed(), 1);
    let stats = pool.take_stats();
    assert_eq!(stats.recycle_error_count, 1);
    pool.close().await;
}

// =============================================================================
// Interceptors
// =============================================================================

struct DenyBorrows;

#[async_trait]
impl Interceptor<MockResource> for DenyBorrows {
    async fn on_borrow(&self) -> BorrowDecision {
        BorrowDecision::Reject("audit policy".into())
    }
}

struct DiscardOnReturn;

#[async_trait]
impl Interceptor<MockResource> for DiscardOnReturn {
    async fn on_recycle(&self, _resource: &mut MockResource) -> RecycleDecision {
        RecycleDecision::Discard
    }
}

#[tokio::test]
async fn borrow_interceptor_can_short_circuit() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory)
        .config(PoolConfig::new().initial_size(1).max_active(1))
        .interceptor(Arc::new(DenyBorrows))
        .build()
        .await
        .unwrap();

    let result = pool.get().await;
    assert!(matches!(result, Err(PoolError::Rejected(reason)) if reason == "audit policy"));
    pool.close().await;
}

#[tokio::test]
async fn recycle_interceptor_can_force_discard() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(PoolConfig::new().initial_size(1).max_active(1))
        .interceptor(Arc::new(DiscardOnReturn))
        .build()
        .await
        .unwrap();

    let handle = pool.get().await.unwrap();
    handle.close().await;

    assert_eq!(pool.status().idle, 0);
    assert_eq!(factory.closed(), 1);
    pool.close().await;
}

// =============================================================================
// Statement cache
// =============================================================================

#[tokio::test]
async fn statement_cache_survives_recycle() {
    use reservoir_pool::{PooledStatement, ResultShape};

    let (pool, _factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let handle = pool.get().await.unwrap();
    handle
        .with_statement_cache(|cache| {
            cache.insert(PooledStatement::new(
                7,
                "SELECT value FROM t WHERE id = ?",
                ResultShape::default(),
            ));
        })
        .await
        .unwrap();
    handle.close().await;

    let handle = pool.get().await.unwrap();
    let hit = handle
        .with_statement_cache(|cache| cache.get("SELECT value FROM t WHERE id = ?", ResultShape::default()))
        .await
        .unwrap();
    assert_eq!(hit, Some(7));

    let stats = pool.take_stats();
    assert_eq!(stats.cache_hits, 1);
    handle.close().await;
    pool.close().await;
}

// =============================================================================
// Disable / close lifecycle
// =============================================================================

#[tokio::test]
async fn disabled_pool_rejects_borrows_with_cause() {
    let (pool, _factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    pool.disable("maintenance window");
    let result = pool.get().await;
    assert!(
        matches!(result, Err(PoolError::Disabled { cause: Some(ref c) }) if c == "maintenance window")
    );

    pool.enable();
    let handle = pool.get().await.unwrap();
    handle.close().await;
    pool.close().await;
}

#[tokio::test]
async fn close_drains_idle_resources_exactly_once() {
    let (pool, factory) = build_pool(PoolConfig::new().initial_size(3).max_active(5)).await;

    pool.close().await;
    assert!(pool.is_closed());
    assert_eq!(factory.closed(), 3);

    // Idempotent.
    pool.close().await;
    assert_eq!(factory.closed(), 3);

    let result = pool.get().await;
    assert!(matches!(result, Err(PoolError::Closed)));
}

#[tokio::test]
async fn close_wakes_blocked_borrowers() {
    let (pool, factory) = build_pool(PoolConfig::new().initial_size(1).max_active(1)).await;

    let held = pool.get().await.unwrap();
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_timeout(Duration::from_secs(10)).await.map(drop) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.close().await;
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::Closed)));

    // The in-flight return still completes; the resource is closed on
    // arrival rather than leaked.
    held.close().await;
    assert_eq!(factory.closed(), 1);
}

// =============================================================================
// Invariants under load
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capacity_invariant_holds_under_churn() {
    let (pool, factory) = build_pool(
        PoolConfig::new()
            .initial_size(1)
            .max_active(3)
            .max_wait(Duration::from_secs(5)),
    )
    .await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..20 {
                let handle = pool.get().await.expect("borrow under churn");
                let status = pool.status();
                assert!(
                    status.active + status.idle <= status.max_active,
                    "capacity invariant violated: {status:?}"
                );
                tokio::time::sleep(Duration::from_millis(1)).await;
                handle.close().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let status = pool.status();
    assert_eq!(status.active, 0);
    assert!(status.idle <= 3);
    assert!(factory.opened() <= 3 + factory.closed());

    pool.close().await;
}
