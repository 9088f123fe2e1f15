pub mod global;

use crate::client::ClientSettings;
use crate::pool::{Clock, Connection, ConnectionPool, PoolStats, SystemClock};
use crate::reaper::IdleReaper;
use crate::utils::error::{PoolError, Result};
use serde::Serialize;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Execution mode of a pool: which transport it stores, which I/O resources
/// it owns and which client handle it hands out.
pub trait Flavor: Send + Sync + 'static {
    type Transport: Connection;
    type Io: Send + Sync;
    type Client;

    const NAME: &'static str;

    /// Set up per-pool I/O resources. Called once, on the first `client()`.
    fn start_io(settings: &ClientSettings) -> Result<Self::Io>;

    fn client(
        pool: &ConnectionPool<Self::Transport>,
        settings: &Arc<ClientSettings>,
        io: &Self::Io,
    ) -> Self::Client;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Shutdown,
}

struct Running<F: Flavor> {
    pool: ConnectionPool<F::Transport>,
    reaper: IdleReaper,
    io: F::Io,
}

enum Lifecycle<F: Flavor> {
    Uninitialized,
    Initialized(Running<F>),
    ShuttingDown,
    Shutdown,
}

/// Owns exactly one connection pool and one idle reaper.
///
/// The pool is built lazily by the first [`client`](Self::client) call and
/// torn down by [`shutdown`](Self::shutdown). A manager cannot be restarted
/// once shut down.
pub struct PoolManager<F: Flavor> {
    settings: Arc<ClientSettings>,
    clock: Arc<dyn Clock>,
    state: Mutex<Lifecycle<F>>,
    /// Signalled once the state reaches `Shutdown`.
    settled: Condvar,
}

impl<F: Flavor> PoolManager<F> {
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: ClientSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings: Arc::new(settings),
            clock,
            state: Mutex::new(Lifecycle::Uninitialized),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle<F>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand out a client bound to the shared pool, initializing the pool and
    /// starting the reaper on first use.
    pub fn client(&self) -> Result<F::Client> {
        let mut state = self.lock();

        match &*state {
            Lifecycle::Initialized(running) => {
                return Ok(F::client(&running.pool, &self.settings, &running.io));
            }
            Lifecycle::ShuttingDown | Lifecycle::Shutdown => return Err(PoolError::Closed),
            Lifecycle::Uninitialized => {}
        }

        // The lock is held for the whole setup so racing first callers share one pool
        let running = self.initialize()?;
        let client = F::client(&running.pool, &self.settings, &running.io);
        *state = Lifecycle::Initialized(running);
        Ok(client)
    }

    fn initialize(&self) -> Result<Running<F>> {
        let config = &self.settings.pool;
        let io = F::start_io(&self.settings)?;
        let pool = ConnectionPool::with_clock(config.clone(), Arc::clone(&self.clock));
        let reaper = IdleReaper::start(
            F::NAME,
            pool.clone(),
            config.reap_interval(),
            config.idle_threshold(),
        )?;

        info!(
            max_total = config.max_total,
            max_per_destination = config.max_per_destination,
            trust = ?self.settings.trust,
            "{} connection pool init success",
            F::NAME
        );

        Ok(Running { pool, reaper, io })
    }

    /// Stop the reaper, then close every pooled connection.
    ///
    /// Safe to call repeatedly and before any client was requested. A caller
    /// that arrives while another one is tearing down waits until the pool is
    /// closed.
    pub fn shutdown(&self) {
        let running = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, Lifecycle::ShuttingDown) {
                Lifecycle::Initialized(running) => running,
                Lifecycle::Uninitialized => {
                    *state = Lifecycle::Shutdown;
                    self.settled.notify_all();
                    debug!("{} connection pool shut down before first use", F::NAME);
                    return;
                }
                Lifecycle::ShuttingDown => {
                    debug!("{} connection pool shutdown in progress, waiting", F::NAME);
                    let _settled = self
                        .settled
                        .wait_while(state, |state| matches!(state, Lifecycle::ShuttingDown))
                        .unwrap_or_else(PoisonError::into_inner);
                    return;
                }
                Lifecycle::Shutdown => {
                    *state = Lifecycle::Shutdown;
                    return;
                }
            }
        };

        let _settle = Settle(self);
        let Running {
            pool,
            mut reaper,
            io,
        } = running;

        reaper.stop();
        let report = pool.shutdown_all();
        drop(io);

        info!(
            "{} connection pool shutdown success ({} connections closed)",
            F::NAME,
            report.len()
        );
    }

    pub fn state(&self) -> ManagerState {
        match &*self.lock() {
            Lifecycle::Uninitialized => ManagerState::Uninitialized,
            Lifecycle::Initialized(_) => ManagerState::Initialized,
            Lifecycle::ShuttingDown => ManagerState::ShuttingDown,
            Lifecycle::Shutdown => ManagerState::Shutdown,
        }
    }

    /// Pool statistics, once the pool exists.
    pub fn stats(&self) -> Option<PoolStats> {
        match &*self.lock() {
            Lifecycle::Initialized(running) => Some(running.pool.stats()),
            _ => None,
        }
    }

    pub fn is_reaper_running(&self) -> bool {
        match &*self.lock() {
            Lifecycle::Initialized(running) => running.reaper.is_running(),
            _ => false,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

/// Moves the manager to `Shutdown` and wakes waiting callers, also when
/// teardown unwinds.
struct Settle<'a, F: Flavor>(&'a PoolManager<F>);

impl<F: Flavor> Drop for Settle<'_, F> {
    fn drop(&mut self) {
        *self.0.lock() = Lifecycle::Shutdown;
        self.0.settled.notify_all();
    }
}

impl<F: Flavor> Drop for PoolManager<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Blocking;
    use crate::pool::Destination;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Debug)]
    struct SlowClose(Arc<AtomicUsize>);

    impl Connection for SlowClose {
        fn close(self) -> std::io::Result<()> {
            std::thread::sleep(Duration::from_millis(100));
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Pool-only flavor whose connections take a while to close.
    struct Slow;

    impl Flavor for Slow {
        type Transport = SlowClose;
        type Io = ();
        type Client = ConnectionPool<SlowClose>;

        const NAME: &'static str = "slow";

        fn start_io(_settings: &ClientSettings) -> Result<()> {
            Ok(())
        }

        fn client(
            pool: &ConnectionPool<SlowClose>,
            _settings: &Arc<ClientSettings>,
            _io: &(),
        ) -> ConnectionPool<SlowClose> {
            pool.clone()
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let manager: PoolManager<Blocking> = PoolManager::new(ClientSettings::default());
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert!(manager.stats().is_none());

        let _client = manager.client().unwrap();
        assert_eq!(manager.state(), ManagerState::Initialized);
        assert!(manager.is_reaper_running());
        assert_eq!(manager.stats().unwrap().max_total, 200);

        manager.shutdown();
        assert_eq!(manager.state(), ManagerState::Shutdown);
        assert!(!manager.is_reaper_running());
    }

    #[test]
    fn shutdown_before_first_use_blocks_later_clients() {
        let manager: PoolManager<Blocking> = PoolManager::new(ClientSettings::default());
        manager.shutdown();
        manager.shutdown();
        assert!(matches!(manager.client(), Err(PoolError::Closed)));
    }

    #[test]
    fn failed_initialization_leaves_manager_uninitialized() {
        let settings = ClientSettings::default()
            .with_trust(crate::client::TrustPolicy::CustomRoots("/nonexistent/ca.pem".into()));
        let manager: PoolManager<Blocking> = PoolManager::new(settings);

        assert!(matches!(manager.client(), Err(PoolError::Initialization(_))));
        assert_eq!(manager.state(), ManagerState::Uninitialized);
    }

    #[test]
    fn concurrent_shutdown_waits_for_teardown() {
        let manager: Arc<PoolManager<Slow>> = Arc::new(PoolManager::new(ClientSettings::default()));
        let pool = manager.client().unwrap();
        let closes = Arc::new(AtomicUsize::new(0));
        let dest = Destination::http("example.com", 80);

        let leases: Vec<_> = (0..4)
            .map(|_| {
                let mut lease = pool.try_acquire(&dest).unwrap();
                lease.attach(SlowClose(closes.clone()));
                lease
            })
            .collect();
        for lease in leases {
            lease.release();
        }
        assert_eq!(pool.stats().idle, 4);

        let first = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.shutdown())
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.state() == ManagerState::Initialized && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }

        manager.shutdown();
        assert_eq!(manager.state(), ManagerState::Shutdown);
        assert!(pool.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 4);

        first.join().unwrap();
        assert!(matches!(manager.client(), Err(PoolError::Closed)));
    }
}
