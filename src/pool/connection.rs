use super::destination::Destination;
use std::fmt;
use std::time::Instant;

/// Transport that can sit in the pool between leases.
pub trait Connection: Send + 'static {
    /// Tear down the underlying transport. Called by the pool when the
    /// connection is evicted, expired or the pool shuts down.
    fn close(self) -> std::io::Result<()>;
}

/// Bookkeeping-only connection, handy when the pool is driven without real sockets.
impl Connection for () {
    fn close(self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Leased,
    Expired,
    Closed,
}

/// Snapshot of a pooled connection's lifecycle metadata.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub destination: Destination,
    pub created_at: Instant,
    pub last_used_at: Instant,
    /// Deadline after which the transport may no longer be reused.
    pub expires_at: Option<Instant>,
    pub state: ConnectionState,
}

impl ConnectionInfo {
    pub(crate) fn new(
        id: ConnectionId,
        destination: Destination,
        now: Instant,
        expires_at: Option<Instant>,
    ) -> Self {
        Self {
            id,
            destination,
            created_at: now,
            last_used_at: now,
            expires_at,
            state: ConnectionState::Leased,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_used_at)
    }
}
