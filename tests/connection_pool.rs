/// Connection Pool Integration Tests
///
/// Capacity, reuse and idle-threshold behavior of the pool driven through its public API.

use pooled_http::pool::{Clock, ConnectionPool, ConnectionState, Destination, ManualClock, PoolConfig};
use pooled_http::reaper::sweep;
use pooled_http::PoolError;
use std::sync::Arc;
use std::time::Duration;

fn small_pool(max_total: usize, max_per_destination: usize) -> (ConnectionPool<()>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let config = PoolConfig {
        max_total,
        max_per_destination,
        lease_timeout_ms: 50,
        ..Default::default()
    };
    (ConnectionPool::with_clock(config, clock.clone()), clock)
}

#[test]
fn capacity_limits_then_reuse_after_release() {
    let (pool, _clock) = small_pool(2, 2);
    let dest = Destination::from_uri("http://a.example").unwrap();

    let mut first = pool.try_acquire(&dest).unwrap();
    first.attach(());
    let mut second = pool.try_acquire(&dest).unwrap();
    second.attach(());

    let stats = pool.stats();
    assert_eq!(stats.leased, 2);
    assert_eq!(stats.available, 0);

    match pool.try_acquire(&dest) {
        Err(PoolError::Exhausted { destination, .. }) => {
            assert_eq!(destination, "http://a.example:80");
        }
        other => panic!("expected Exhausted, got {:?}", other.map(|l| l.id())),
    }

    let first_id = first.id();
    pool.release(first);

    let reused = pool.try_acquire(&dest).unwrap();
    assert_eq!(reused.id(), first_id);
    assert!(!reused.is_fresh());
    assert_eq!(pool.stats().leased, 2);

    reused.release();
    second.release();
    assert_eq!(pool.stats().idle, 2);
}

#[test]
fn blocking_acquire_times_out_when_exhausted() {
    let (pool, _clock) = small_pool(1, 1);
    let dest = Destination::http("a.example", 80);

    let _held = pool.try_acquire(&dest).unwrap();
    let err = pool.acquire(&dest).unwrap_err();

    assert!(err.is_recoverable());
    match err {
        PoolError::Exhausted { waited, .. } => assert!(waited >= Duration::from_millis(50)),
        other => panic!("expected Exhausted, got {:?}", other),
    }
}

#[test]
fn blocking_acquire_wakes_on_release() {
    let clock = Arc::new(ManualClock::new());
    let config = PoolConfig {
        max_total: 1,
        max_per_destination: 1,
        lease_timeout_ms: 5_000,
        ..Default::default()
    };
    let pool: ConnectionPool<()> = ConnectionPool::with_clock(config, clock);
    let dest = Destination::http("a.example", 80);

    let mut held = pool.try_acquire(&dest).unwrap();
    held.attach(());
    let held_id = held.id();

    let waiter = {
        let pool = pool.clone();
        let dest = dest.clone();
        std::thread::spawn(move || pool.acquire(&dest).map(|lease| lease.id()))
    };

    // Let the waiter park before releasing
    while pool.stats().pending == 0 {
        std::thread::sleep(Duration::from_millis(5));
    }
    held.release();

    assert_eq!(waiter.join().unwrap().unwrap(), held_id);
}

#[test]
fn reuse_prefers_most_recently_released() {
    let (pool, clock) = small_pool(10, 10);
    let dest = Destination::http("a.example", 80);

    let mut older = pool.try_acquire(&dest).unwrap();
    older.attach(());
    let mut newer = pool.try_acquire(&dest).unwrap();
    newer.attach(());
    let newer_id = newer.id();

    older.release();
    clock.advance(Duration::from_secs(1));
    newer.release();

    assert_eq!(pool.try_acquire(&dest).unwrap().id(), newer_id);
}

#[test]
fn total_cap_evicts_idle_connection_of_other_destination() {
    let (pool, _clock) = small_pool(2, 2);
    let a = Destination::http("a.example", 80);
    let b = Destination::http("b.example", 80);

    for _ in 0..2 {
        let mut lease = pool.try_acquire(&a).unwrap();
        lease.attach(());
        lease.release();
    }
    // Only one idle connection remains for `a`, since the second lease reused the first
    assert_eq!(pool.stats().idle, 1);

    let mut extra = pool.try_acquire(&a).unwrap();
    extra.attach(());
    let mut other = pool.try_acquire(&a).unwrap();
    other.attach(());
    extra.release();
    other.release();
    assert_eq!(pool.stats().idle, 2);

    let lease_b = pool.try_acquire(&b).unwrap();
    let stats = pool.stats();
    assert_eq!(stats.total(), 2);
    assert_eq!(stats.routes["http://a.example:80"].idle, 1);
    assert_eq!(stats.routes["http://b.example:80"].leased, 1);
    drop(lease_b);
}

#[test]
fn idle_threshold_spares_at_29s_and_closes_at_31s() {
    let (pool, clock) = small_pool(10, 10);
    let dest = Destination::http("a.example", 80);
    let threshold = Duration::from_secs(30);

    let mut lease = pool.try_acquire(&dest).unwrap();
    lease.attach(());
    lease.release();

    clock.advance(Duration::from_secs(29));
    let outcome = sweep(&pool, clock.now(), threshold);
    assert_eq!(outcome.closed(), 0);
    assert_eq!(pool.stats().idle, 1);

    clock.advance(Duration::from_secs(2));
    let outcome = sweep(&pool, clock.now(), threshold);
    assert_eq!(outcome.idle, 1);
    assert!(outcome.errors.is_empty());
    assert_eq!(pool.stats().total(), 0);
}

#[test]
fn leased_connection_survives_idle_and_expiry_sweeps() {
    let (pool, clock) = small_pool(10, 10);
    let dest = Destination::http("a.example", 80);

    let mut lease = pool.try_acquire(&dest).unwrap();
    lease.attach(());
    lease.set_keep_alive(Duration::from_secs(1));

    clock.advance(Duration::from_secs(120));
    assert!(pool.close_expired(clock.now()).is_empty());
    assert!(pool.close_idle(clock.now(), Duration::ZERO).is_empty());

    let infos = pool.connections();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].state, ConnectionState::Leased);

    lease.release();
    assert_eq!(pool.stats().idle, 1);
}

#[test]
fn keep_alive_hint_expires_connection() {
    let (pool, clock) = small_pool(10, 10);
    let dest = Destination::http("a.example", 80);

    let mut lease = pool.try_acquire(&dest).unwrap();
    lease.attach(());
    lease.set_keep_alive(Duration::from_secs(10));
    lease.release();

    clock.advance(Duration::from_secs(9));
    assert!(pool.close_expired(clock.now()).is_empty());

    clock.advance(Duration::from_secs(1));
    let report = pool.close_expired(clock.now());
    assert_eq!(report.len(), 1);
    assert_eq!(report.closed[0].state, ConnectionState::Expired);

    // Idempotent
    assert!(pool.close_expired(clock.now()).is_empty());
}

#[test]
fn shutdown_refuses_new_leases() {
    let (pool, _clock) = small_pool(10, 10);
    let dest = Destination::http("a.example", 80);

    let mut idle = pool.try_acquire(&dest).unwrap();
    idle.attach(());
    idle.release();
    let mut leased = pool.try_acquire(&Destination::http("b.example", 80)).unwrap();
    leased.attach(());

    let report = pool.shutdown_all();
    assert_eq!(report.len(), 2);
    assert!(pool.is_closed());
    assert!(matches!(pool.try_acquire(&dest), Err(PoolError::Closed)));
    assert!(matches!(pool.acquire(&dest), Err(PoolError::Closed)));

    // Returning a lease after shutdown only closes its transport
    leased.release();
    assert_eq!(pool.stats().total(), 0);
    assert!(pool.shutdown_all().is_empty());
}

#[tokio::test]
async fn async_acquire_waits_for_release() {
    let clock = Arc::new(ManualClock::new());
    let config = PoolConfig {
        max_total: 1,
        max_per_destination: 1,
        lease_timeout_ms: 5_000,
        ..Default::default()
    };
    let pool: ConnectionPool<()> = ConnectionPool::with_clock(config, clock);
    let dest = Destination::http("a.example", 80);

    let mut held = pool.try_acquire(&dest).unwrap();
    held.attach(());
    let held_id = held.id();

    let waiter = {
        let pool = pool.clone();
        let dest = dest.clone();
        tokio::spawn(async move { pool.acquire_async(&dest).await.map(|lease| lease.id()) })
    };

    while pool.stats().pending == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    held.release();

    assert_eq!(waiter.await.unwrap().unwrap(), held_id);
}

#[tokio::test]
async fn async_acquire_times_out() {
    let (pool, _clock) = small_pool(1, 1);
    let dest = Destination::http("a.example", 80);

    let _held = pool.try_acquire(&dest).unwrap();
    let result = pool.acquire_async(&dest).await;
    assert!(matches!(result, Err(PoolError::Exhausted { .. })));
}
