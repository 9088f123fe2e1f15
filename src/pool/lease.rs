use super::connection::{Connection, ConnectionId, ConnectionInfo};
use super::destination::Destination;
use super::Shared;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Exclusive, temporary right to use one pooled connection.
///
/// A fresh lease carries no transport yet; the holder connects and
/// [`attach`](Lease::attach)es it. Call [`release`](Lease::release) to hand the
/// connection back for reuse. Dropping a lease without releasing it discards
/// the connection, since its transport may be mid-exchange.
pub struct Lease<T: Connection> {
    info: ConnectionInfo,
    transport: Option<T>,
    fresh: bool,
    keep_alive: Option<Duration>,
    shared: Option<Arc<Shared<T>>>,
}

impl<T: Connection> Lease<T> {
    pub(crate) fn new(info: ConnectionInfo, transport: Option<T>, shared: Arc<Shared<T>>) -> Self {
        Self {
            fresh: transport.is_none(),
            info,
            transport,
            keep_alive: None,
            shared: Some(shared),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    pub fn destination(&self) -> &Destination {
        &self.info.destination
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// True when the pool had no idle connection and reserved a new slot.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    /// Install the transport opened for a fresh lease. Replaces any previous one.
    pub fn attach(&mut self, transport: T) {
        if let Some(old) = self.transport.replace(transport) {
            if let Err(e) = old.close() {
                debug!("Error closing replaced transport for {}: {}", self.info.id, e);
            }
        }
    }

    /// Record how long the peer is willing to keep this connection alive.
    /// Applied when the lease is released.
    pub fn set_keep_alive(&mut self, keep_alive: Duration) {
        self.keep_alive = Some(keep_alive);
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }

    /// Return the connection to the pool as idle.
    pub fn release(mut self) {
        if let Some(shared) = self.shared.take() {
            shared.check_in(self.info.id, self.transport.take(), self.keep_alive, true);
        }
    }

    /// Remove the connection from the pool, closing its transport.
    /// Use after a transport error.
    pub fn discard(mut self) {
        if let Some(shared) = self.shared.take() {
            shared.check_in(self.info.id, self.transport.take(), None, false);
        }
    }
}

impl<T: Connection> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.check_in(self.info.id, self.transport.take(), None, false);
        }
    }
}

impl<T: Connection> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.info.id)
            .field("destination", &self.info.destination)
            .field("fresh", &self.fresh)
            .field("connected", &self.transport.is_some())
            .finish()
    }
}
