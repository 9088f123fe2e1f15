mod clock;
mod connection;
mod destination;
mod lease;
mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{Connection, ConnectionId, ConnectionInfo, ConnectionState};
pub use destination::{Destination, Scheme};
pub use lease::Lease;
pub use stats::{PoolStats, RouteStats};

use crate::utils::error::{PoolError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Configuration for connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections (leased + idle) across all destinations
    pub max_total: usize,
    /// Maximum connections (leased + idle) per destination
    pub max_per_destination: usize,
    /// Idle connections unused for this long are reaped (seconds)
    pub idle_threshold_secs: u64,
    /// How often the reaper sweeps the pool (seconds)
    pub reap_interval_secs: u64,
    /// How long `acquire` waits for capacity before giving up (milliseconds)
    pub lease_timeout_ms: u64,
    /// Hard cap on a connection's lifetime, measured from creation (seconds)
    pub time_to_live_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: 200,
            max_per_destination: 20,
            idle_threshold_secs: 30,
            reap_interval_secs: 5,
            lease_timeout_ms: 30_000,
            time_to_live_secs: None,
        }
    }
}

impl PoolConfig {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        self.time_to_live_secs.map(Duration::from_secs)
    }
}

/// Connections closed by a single pool operation.
///
/// Each closed entry keeps `Expired` when it was dropped for reaching its
/// expiry, `Closed` otherwise.
#[derive(Debug, Default)]
pub struct CloseReport {
    pub closed: Vec<ConnectionInfo>,
    pub failures: Vec<(ConnectionId, std::io::Error)>,
}

impl CloseReport {
    pub fn len(&self) -> usize {
        self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closed.is_empty()
    }

    pub fn merge(&mut self, other: CloseReport) {
        self.closed.extend(other.closed);
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Default)]
struct Route {
    /// Least recently used first
    idle: Vec<ConnectionId>,
    leased: usize,
}

impl Route {
    fn len(&self) -> usize {
        self.idle.len() + self.leased
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry<T> {
    info: ConnectionInfo,
    /// Present while idle; taken by the lease while leased
    transport: Option<T>,
}

struct PoolState<T> {
    closed: bool,
    next_id: u64,
    entries: HashMap<ConnectionId, Entry<T>>,
    routes: HashMap<Destination, Route>,
}

pub(crate) struct Shared<T> {
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<T>>,
    available: Condvar,
    notify: Notify,
    pending: AtomicUsize,
}

struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn exhausted(destination: &Destination, waited: Duration) -> PoolError {
    PoolError::Exhausted {
        destination: destination.to_string(),
        waited,
    }
}

impl<T: Connection> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_waiters(&self) {
        self.available.notify_all();
        self.notify.notify_waiters();
    }

    /// One non-blocking attempt. `Ok(None)` means the caps are reached.
    fn checkout(self: &Arc<Self>, destination: &Destination) -> Result<Option<Lease<T>>> {
        let mut evicted = Vec::new();
        let outcome = {
            let mut state = self.lock();
            let now = self.clock.now();
            self.checkout_locked(&mut state, destination, now, &mut evicted)
        };
        close_entries(evicted);
        outcome
    }

    fn checkout_locked(
        self: &Arc<Self>,
        state: &mut PoolState<T>,
        destination: &Destination,
        now: Instant,
        evicted: &mut Vec<Entry<T>>,
    ) -> Result<Option<Lease<T>>> {
        if state.closed {
            return Err(PoolError::Closed);
        }

        let PoolState {
            next_id,
            entries,
            routes,
            ..
        } = state;

        // Most recently used first; expired ones are dropped on the way
        let route_len = match routes.get_mut(destination) {
            Some(route) => {
                while let Some(id) = route.idle.pop() {
                    let expired = match entries.get(&id) {
                        Some(entry) => entry.info.is_expired(now),
                        None => continue,
                    };

                    if expired {
                        if let Some(mut entry) = entries.remove(&id) {
                            trace!("Discarding expired connection {} to {}", id, destination);
                            entry.info.state = ConnectionState::Expired;
                            evicted.push(entry);
                        }
                        continue;
                    }

                    if let Some(entry) = entries.get_mut(&id) {
                        entry.info.state = ConnectionState::Leased;
                        route.leased += 1;
                        trace!("Reusing pooled connection {} to {}", id, destination);
                        return Ok(Some(Lease::new(
                            entry.info.clone(),
                            entry.transport.take(),
                            Arc::clone(self),
                        )));
                    }
                }
                route.len()
            }
            None => 0,
        };

        // Routes only exist while they hold a connection
        if route_len == 0 {
            routes.remove(destination);
        }

        if route_len >= self.config.max_per_destination {
            trace!(
                "Per-destination limit reached for {} ({}/{})",
                destination,
                route_len,
                self.config.max_per_destination
            );
            return Ok(None);
        }

        if entries.len() >= self.config.max_total {
            match evict_least_recently_used(entries, routes, destination) {
                Some(victim) => evicted.push(victim),
                None => {
                    trace!("Total limit reached ({})", self.config.max_total);
                    return Ok(None);
                }
            }
        }

        let id = ConnectionId(*next_id);
        *next_id += 1;
        let expires_at = self.config.time_to_live().map(|ttl| now + ttl);
        let info = ConnectionInfo::new(id, destination.clone(), now, expires_at);
        entries.insert(
            id,
            Entry {
                info: info.clone(),
                transport: None,
            },
        );
        routes.entry(destination.clone()).or_default().leased += 1;

        debug!("Pool miss for {}, reserved new connection {}", destination, id);
        Ok(Some(Lease::new(info, None, Arc::clone(self))))
    }

    /// Return point for every lease, whether released, discarded or dropped.
    pub(crate) fn check_in(
        &self,
        id: ConnectionId,
        transport: Option<T>,
        keep_alive: Option<Duration>,
        reusable: bool,
    ) {
        let mut to_close = None;
        {
            let mut state = self.lock();
            let now = self.clock.now();
            let PoolState {
                closed,
                entries,
                routes,
                ..
            } = &mut *state;

            match entries.get(&id).map(|entry| entry.info.destination.clone()) {
                None => {
                    // Pool was shut down while this lease was out
                    trace!("Connection {} returned to a closed pool", id);
                    to_close = transport;
                }
                Some(destination) => {
                    if let Some(route) = routes.get_mut(&destination) {
                        route.leased = route.leased.saturating_sub(1);
                    }

                    if reusable && !*closed && transport.is_some() {
                        if let Some(entry) = entries.get_mut(&id) {
                            let ttl_deadline = self
                                .config
                                .time_to_live()
                                .map(|ttl| entry.info.created_at + ttl);
                            entry.info.expires_at = match (keep_alive.map(|k| now + k), ttl_deadline)
                            {
                                (Some(keep), Some(ttl)) => Some(keep.min(ttl)),
                                (keep, ttl) => keep.or(ttl),
                            };
                            entry.info.state = ConnectionState::Idle;
                            entry.info.last_used_at = now;
                            entry.transport = transport;
                        }
                        let route = routes.entry(destination.clone()).or_default();
                        route.idle.push(id);
                        trace!(
                            "Returned connection {} to pool for {} (idle: {})",
                            id,
                            destination,
                            route.idle.len()
                        );
                    } else {
                        entries.remove(&id);
                        if routes.get(&destination).is_some_and(Route::is_empty) {
                            routes.remove(&destination);
                        }
                        trace!("Removed connection {} to {} from pool", id, destination);
                        to_close = transport;
                    }
                }
            }
        }

        self.wake_waiters();

        if let Some(transport) = to_close {
            if let Err(e) = transport.close() {
                debug!("Error closing connection {}: {}", id, e);
            }
        }
    }

    fn close_idle_where<F>(&self, reason: ConnectionState, mut should_close: F) -> CloseReport
    where
        F: FnMut(&ConnectionInfo) -> bool,
    {
        let mut victims = Vec::new();
        {
            let mut state = self.lock();
            if state.closed {
                return CloseReport::default();
            }

            let PoolState {
                entries, routes, ..
            } = &mut *state;

            for route in routes.values_mut() {
                // Only the idle lists are walked, so a leased connection is never a candidate
                route.idle.retain(|id| {
                    let close = match entries.get(id) {
                        Some(entry) => {
                            entry.info.state == ConnectionState::Idle && should_close(&entry.info)
                        }
                        None => return false,
                    };
                    if close {
                        if let Some(mut entry) = entries.remove(id) {
                            entry.info.state = reason;
                            victims.push(entry);
                        }
                    }
                    !close
                });
            }
            routes.retain(|_, route| !route.is_empty());
        }

        if !victims.is_empty() {
            self.wake_waiters();
        }
        close_entries(victims)
    }
}

fn evict_least_recently_used<T>(
    entries: &mut HashMap<ConnectionId, Entry<T>>,
    routes: &mut HashMap<Destination, Route>,
    except: &Destination,
) -> Option<Entry<T>> {
    let (destination, position) = routes
        .iter()
        .filter(|(destination, _)| *destination != except)
        .flat_map(|(destination, route)| {
            route
                .idle
                .iter()
                .enumerate()
                .map(move |(position, id)| (destination, position, id))
        })
        .filter_map(|(destination, position, id)| {
            entries
                .get(id)
                .map(|entry| (destination, position, entry.info.last_used_at))
        })
        .min_by_key(|(_, _, last_used)| *last_used)
        .map(|(destination, position, _)| (destination.clone(), position))?;

    let route = routes.get_mut(&destination)?;
    let id = route.idle.remove(position);
    if route.is_empty() {
        routes.remove(&destination);
    }

    let mut entry = entries.remove(&id)?;
    trace!("Evicted least recently used connection {} to {}", id, destination);
    entry.info.state = ConnectionState::Closed;
    Some(entry)
}

/// Close transports outside the pool lock.
fn close_entries<T: Connection>(entries: Vec<Entry<T>>) -> CloseReport {
    let mut report = CloseReport::default();
    for Entry {
        mut info,
        transport,
    } in entries
    {
        if let Some(transport) = transport {
            if let Err(e) = transport.close() {
                debug!("Error closing connection {} to {}: {}", info.id, info.destination, e);
                report.failures.push((info.id, e));
            }
        }
        if info.state != ConnectionState::Expired {
            info.state = ConnectionState::Closed;
        }
        report.closed.push(info);
    }
    report
}

/// Bounded pool of reusable connections keyed by [`Destination`].
///
/// Enforces a total cap and a per-destination cap across leased and idle
/// connections. Cloning yields another handle to the same pool.
pub struct ConnectionPool<T: Connection> {
    shared: Arc<Shared<T>>,
}

impl<T: Connection> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Connection> ConnectionPool<T> {
    /// Create a new connection pool with the given configuration
    pub fn new(config: PoolConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: PoolConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                state: Mutex::new(PoolState {
                    closed: false,
                    next_id: 1,
                    entries: HashMap::new(),
                    routes: HashMap::new(),
                }),
                available: Condvar::new(),
                notify: Notify::new(),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Current time according to the pool's clock.
    pub fn now(&self) -> Instant {
        self.shared.clock.now()
    }

    /// Lease a connection without waiting.
    ///
    /// Reuses the most recently released idle connection for `destination`,
    /// otherwise reserves a new one if both caps allow it.
    pub fn try_acquire(&self, destination: &Destination) -> Result<Lease<T>> {
        self.shared
            .checkout(destination)?
            .ok_or_else(|| exhausted(destination, Duration::ZERO))
    }

    /// Lease a connection, blocking the current thread up to `lease_timeout`
    /// for capacity to free up.
    pub fn acquire(&self, destination: &Destination) -> Result<Lease<T>> {
        let shared = &self.shared;
        let started = Instant::now();
        let deadline = started + shared.config.lease_timeout();
        let mut evicted = Vec::new();

        let mut state = shared.lock();
        let outcome = loop {
            let now = shared.clock.now();
            match shared.checkout_locked(&mut state, destination, now, &mut evicted) {
                Ok(Some(lease)) => break Ok(lease),
                Ok(None) => {}
                Err(e) => break Err(e),
            }

            // Expired connections dropped by this attempt are closed before waiting
            if !evicted.is_empty() {
                drop(state);
                close_entries(std::mem::take(&mut evicted));
                state = shared.lock();
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(exhausted(destination, started.elapsed()));
            }

            let _pending = PendingGuard::enter(&shared.pending);
            state = shared
                .available
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };
        drop(state);

        close_entries(evicted);
        outcome
    }

    /// Async counterpart of [`acquire`](Self::acquire).
    pub async fn acquire_async(&self, destination: &Destination) -> Result<Lease<T>> {
        let started = tokio::time::Instant::now();
        let deadline = started + self.shared.config.lease_timeout();

        loop {
            // Register interest before checking so a release in between is not missed
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.shared.checkout(destination)? {
                return Ok(lease);
            }

            let _pending = PendingGuard::enter(&self.shared.pending);
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(exhausted(destination, started.elapsed()));
            }
        }
    }

    /// Return a leased connection to the pool for reuse.
    pub fn release(&self, lease: Lease<T>) {
        lease.release();
    }

    /// Drop a leased connection from the pool after a transport error.
    pub fn discard(&self, lease: Lease<T>) {
        lease.discard();
    }

    /// Close idle connections whose keep-alive or time-to-live deadline has passed.
    pub fn close_expired(&self, now: Instant) -> CloseReport {
        let report = self
            .shared
            .close_idle_where(ConnectionState::Expired, |info| info.is_expired(now));
        if !report.is_empty() {
            debug!("Closed {} expired connections", report.len());
        }
        report
    }

    /// Close idle connections unused for at least `threshold`.
    pub fn close_idle(&self, now: Instant, threshold: Duration) -> CloseReport {
        let report = self
            .shared
            .close_idle_where(ConnectionState::Closed, |info| info.idle_for(now) >= threshold);
        if !report.is_empty() {
            debug!(
                "Closed {} connections idle for more than {:?}",
                report.len(),
                threshold
            );
        }
        report
    }

    /// Close every connection and refuse further leases.
    ///
    /// Leased connections are dropped from the bookkeeping now and their
    /// transports closed as the leases come back. Calling this again is a no-op.
    pub fn shutdown_all(&self) -> CloseReport {
        let victims: Vec<Entry<T>> = {
            let mut state = self.shared.lock();
            if state.closed {
                return CloseReport::default();
            }
            state.closed = true;
            state.routes.clear();
            state.entries.drain().map(|(_, entry)| entry).collect()
        };

        self.shared.wake_waiters();
        let report = close_entries(victims);
        debug!("Pool shut down, closed {} connections", report.len());
        report
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        let config = &self.shared.config;

        let mut stats = PoolStats {
            pending: self.shared.pending.load(Ordering::SeqCst),
            max_total: config.max_total,
            max_per_destination: config.max_per_destination,
            closed: state.closed,
            ..Default::default()
        };

        for (destination, route) in state.routes.iter().filter(|(_, r)| !r.is_empty()) {
            stats.leased += route.leased;
            stats.idle += route.idle.len();
            stats.routes.insert(
                destination.to_string(),
                RouteStats {
                    leased: route.leased,
                    idle: route.idle.len(),
                },
            );
        }
        stats.available = config.max_total.saturating_sub(state.entries.len());
        stats
    }

    /// Snapshot of every tracked connection.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let state = self.shared.lock();
        let mut infos: Vec<ConnectionInfo> =
            state.entries.values().map(|entry| entry.info.clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}
