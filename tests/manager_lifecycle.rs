/// Pool Manager Lifecycle Tests
///
/// Lazy initialization, shutdown idempotence and the process-wide managers.

use pooled_http::client::{Async, Blocking};
use pooled_http::pool::{Destination, PoolConfig};
use pooled_http::{global, ClientSettings, ManagerState, PoolError, PoolManager};
use std::sync::{Arc, Barrier};

fn settings() -> ClientSettings {
    ClientSettings {
        io_threads: 2,
        ..Default::default()
    }
    .with_pool(PoolConfig {
        max_total: 4,
        max_per_destination: 2,
        lease_timeout_ms: 100,
        ..Default::default()
    })
}

#[test]
fn first_client_initializes_pool_and_reaper() {
    let manager: PoolManager<Blocking> = PoolManager::new(settings());
    assert_eq!(manager.state(), ManagerState::Uninitialized);
    assert!(manager.stats().is_none());
    assert!(!manager.is_reaper_running());

    let client = manager.client().unwrap();
    assert_eq!(manager.state(), ManagerState::Initialized);
    assert!(manager.is_reaper_running());

    let stats = client.stats();
    assert_eq!(stats.max_total, 4);
    assert_eq!(stats.max_per_destination, 2);
}

#[test]
fn shutdown_twice_is_a_no_op() {
    let manager: PoolManager<Blocking> = PoolManager::new(settings());
    let client = manager.client().unwrap();

    manager.shutdown();
    assert_eq!(manager.state(), ManagerState::Shutdown);
    assert!(!manager.is_reaper_running());
    assert!(client.pool().is_closed());

    manager.shutdown();
    assert_eq!(manager.state(), ManagerState::Shutdown);
}

#[test]
fn client_after_shutdown_fails_with_closed() {
    let manager: PoolManager<Blocking> = PoolManager::new(settings());
    let client = manager.client().unwrap();
    manager.shutdown();

    assert!(matches!(manager.client(), Err(PoolError::Closed)));

    // Existing handles see the closed pool too
    let dest = Destination::http("127.0.0.1", 9);
    assert!(matches!(client.lease(&dest), Err(PoolError::Closed)));
}

#[test]
fn shutdown_before_first_use() {
    let manager: PoolManager<Blocking> = PoolManager::new(settings());
    manager.shutdown();

    assert_eq!(manager.state(), ManagerState::Shutdown);
    assert!(matches!(manager.client(), Err(PoolError::Closed)));
}

#[test]
fn concurrent_first_calls_share_one_pool() {
    let manager: Arc<PoolManager<Blocking>> = Arc::new(PoolManager::new(settings()));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                manager.client().unwrap()
            })
        })
        .collect();

    let clients: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // A lease taken through one handle is visible through every other
    let dest = Destination::http("example.com", 80);
    let lease = clients[0].pool().try_acquire(&dest).unwrap();
    for client in &clients {
        assert_eq!(client.stats().leased, 1);
    }
    drop(lease);

    for client in &clients {
        assert_eq!(client.stats().total(), 0);
    }
}

#[tokio::test]
async fn async_manager_lifecycle() {
    let manager: PoolManager<Async> = PoolManager::new(settings());
    let client = manager.client().unwrap();
    assert!(manager.is_reaper_running());

    let dest = Destination::http("example.com", 80);
    let lease = client.pool().acquire_async(&dest).await.unwrap();
    assert_eq!(manager.stats().unwrap().leased, 1);
    drop(lease);

    manager.shutdown();
    assert_eq!(manager.state(), ManagerState::Shutdown);
    assert!(matches!(
        client.pool().acquire_async(&dest).await,
        Err(PoolError::Closed)
    ));
    manager.shutdown();
}

#[test]
fn process_wide_managers() {
    assert!(std::ptr::eq(global::plain(), global::plain()));
    assert!(!global::plain().settings().trust.is_insecure());
    assert!(global::trust_all().settings().trust.is_insecure());

    // Already created above, so late configuration is rejected
    assert!(matches!(
        global::configure_plain(ClientSettings::default()),
        Err(PoolError::Config(_))
    ));

    let manager = global::configure_async(settings()).unwrap();
    assert!(std::ptr::eq(manager, global::asynchronous()));
    assert_eq!(manager.settings().pool.max_total, 4);

    global::trust_all().client().unwrap();
    assert_eq!(global::trust_all().state(), ManagerState::Initialized);

    global::shutdown_all();
    assert_eq!(global::plain().state(), ManagerState::Shutdown);
    assert_eq!(global::trust_all().state(), ManagerState::Shutdown);
    assert_eq!(global::asynchronous().state(), ManagerState::Shutdown);
    assert!(matches!(global::trust_all().client(), Err(PoolError::Closed)));
}
