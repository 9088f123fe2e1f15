use crate::pool::{Connection, ConnectionPool};
use crate::utils::error::{PoolError, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Result of one sweep over the pool.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub expired: usize,
    pub idle: usize,
    /// One `PoolError::Sweep` per connection that failed to close cleanly
    pub errors: Vec<PoolError>,
}

impl SweepOutcome {
    pub fn closed(&self) -> usize {
        self.expired + self.idle
    }
}

/// Close expired connections, then connections idle for at least `idle_threshold`.
pub fn sweep<T: Connection>(
    pool: &ConnectionPool<T>,
    now: Instant,
    idle_threshold: Duration,
) -> SweepOutcome {
    let expired = pool.close_expired(now);
    let idle = pool.close_idle(now, idle_threshold);

    let errors = expired
        .failures
        .into_iter()
        .chain(idle.failures)
        .map(|(id, e)| PoolError::Sweep(format!("closing {}: {}", id, e)))
        .collect();

    SweepOutcome {
        expired: expired.closed.len(),
        idle: idle.closed.len(),
        errors,
    }
}

/// Handle to the background task that periodically sweeps a pool.
///
/// The task runs on its own thread with a single-threaded tokio runtime so it
/// works the same for blocking and async pool flavors. The first sweep runs
/// immediately, then once per `interval`.
#[derive(Debug)]
pub struct IdleReaper {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl IdleReaper {
    pub fn start<T: Connection>(
        name: &str,
        pool: ConnectionPool<T>,
        interval: Duration,
        idle_threshold: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(PoolError::Initialization(
                "reap interval must be greater than zero".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| PoolError::Initialization(format!("failed to build reaper runtime: {}", e)))?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let thread_name = format!("{}-reaper", name);

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                runtime.block_on(run(pool, task_cancel, interval, idle_threshold));
            })
            .map_err(|e| {
                PoolError::Initialization(format!("failed to spawn {}: {}", thread_name, e))
            })?;

        info!(
            interval = ?interval,
            idle_threshold = ?idle_threshold,
            "{} idle reaper started",
            name
        );

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel future sweeps and wait for the reaper thread to exit.
    /// A sweep already in progress is allowed to finish. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Idle reaper thread terminated abnormally");
            } else {
                debug!("Idle reaper stopped");
            }
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<T: Connection>(
    pool: ConnectionPool<T>,
    cancel: CancellationToken,
    interval: Duration,
    idle_threshold: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // A failed sweep must not end the schedule
        match catch_unwind(AssertUnwindSafe(|| sweep(&pool, pool.now(), idle_threshold))) {
            Ok(outcome) => {
                for err in &outcome.errors {
                    warn!("{}", err);
                }
                if outcome.closed() > 0 {
                    debug!(
                        "Periodic sweep closed {} expired and {} idle connections",
                        outcome.expired, outcome.idle
                    );
                }
            }
            Err(_) => {
                error!("{}", PoolError::Sweep("sweep panicked".to_string()));
            }
        }

        trace!("Status: {:?}", pool.stats());
    }
}
