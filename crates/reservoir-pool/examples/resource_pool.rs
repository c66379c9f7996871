//! Resource pooling with stats example.
//!
//! Runs the pool against the in-memory mock factory so it works with no
//! external services, and shows configuration, concurrent borrowing,
//! and stats monitoring.
//!
//! # Running
//!
//! ```bash
//! cargo run --example resource_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use reservoir_pool::{Pool, PoolConfig, PoolError};
use reservoir_testing::{MockFactory, MockValidator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Resource Pool Example ===\n");

    let pool_config = PoolConfig::new()
        .initial_size(2)
        .min_idle(2)
        .max_active(10)
        .max_wait(Duration::from_secs(5))
        .eviction_interval(Duration::from_secs(10))
        .test_on_borrow(true);

    println!("Pool configuration:");
    println!("  Initial size: {}", pool_config.initial_size);
    println!("  Min idle: {}", pool_config.min_idle);
    println!("  Max active: {}", pool_config.max_active);
    println!();

    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(pool_config)
        .validator(Arc::new(MockValidator))
        .build()
        .await?;

    print_status(&pool);

    // 1. Basic borrow/return
    println!("\n1. Basic borrow and return:");
    {
        let handle = pool.get().await?;
        let resource = handle.resource().await?;
        println!("  Borrowed resource #{}", resource.id());
        drop(resource);
        handle.close().await;
    }
    print_status(&pool);

    // 2. Concurrent borrowing
    println!("\n2. Concurrent borrowing (20 tasks, 10 slots):");
    let mut tasks = Vec::new();
    for i in 0..20 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let handle = pool.get().await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.close().await;
            Ok::<_, PoolError>(i)
        }));
    }
    let mut completed = 0;
    for task in tasks {
        if task.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  Completed {completed} borrows");
    print_status(&pool);

    // 3. Stats snapshot
    println!("\n3. Stats snapshot:");
    let stats = pool.take_stats();
    println!("  Borrows: {}", stats.borrow_count);
    println!("  Recycles: {}", stats.recycle_count);
    println!("  Creates: {}", stats.create_count);
    println!("  Active peak: {}", stats.active_peak);
    println!(
        "  Waits: {} (mean {:?})",
        stats.wait_count,
        stats.mean_wait().unwrap_or_default()
    );

    // 4. Shutdown
    println!("\n4. Shutdown:");
    pool.close().await;
    println!(
        "  Pool closed; opened {} resources, closed {}",
        factory.opened(),
        factory.closed()
    );

    Ok(())
}

fn print_status(pool: &Pool<MockFactory>) {
    let status = pool.status();
    println!(
        "  Status: {} active / {} idle / {} max",
        status.active, status.idle, status.max_active
    );
}
