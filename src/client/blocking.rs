use super::settings::ClientSettings;
use super::tls::build_client_config;
use super::transport::{connect_blocking, BlockingTransport};
use crate::manager::Flavor;
use crate::pool::{ConnectionPool, Destination, Lease, PoolStats};
use crate::utils::error::{PoolError, Result};
use rustls::ClientConfig;
use std::sync::Arc;
use tracing::debug;

/// Blocking execution mode. Backs the plain and TLS-trusting pools.
#[derive(Debug)]
pub struct Blocking;

#[derive(Debug)]
pub struct BlockingIo {
    tls: Arc<ClientConfig>,
}

impl Flavor for Blocking {
    type Transport = BlockingTransport;
    type Io = BlockingIo;
    type Client = Client;

    const NAME: &'static str = "blocking";

    fn start_io(settings: &ClientSettings) -> Result<Self::Io> {
        let tls = build_client_config(&settings.trust)
            .map_err(|e| PoolError::Initialization(format!("TLS setup failed: {}", e)))?;
        Ok(BlockingIo { tls: Arc::new(tls) })
    }

    fn client(
        pool: &ConnectionPool<Self::Transport>,
        settings: &Arc<ClientSettings>,
        io: &Self::Io,
    ) -> Self::Client {
        Client {
            pool: pool.clone(),
            settings: Arc::clone(settings),
            tls: Arc::clone(&io.tls),
        }
    }
}

/// Lightweight handle onto a shared blocking pool. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    pool: ConnectionPool<BlockingTransport>,
    settings: Arc<ClientSettings>,
    tls: Arc<ClientConfig>,
}

impl Client {
    /// Lease a connected transport to `destination`, opening one on a pool miss.
    /// Blocks up to the lease timeout when the pool is saturated.
    pub fn lease(&self, destination: &Destination) -> Result<Lease<BlockingTransport>> {
        let mut lease = self.pool.acquire(destination)?;
        if lease.is_fresh() {
            match connect_blocking(destination, &self.settings, &self.tls) {
                Ok(transport) => lease.attach(transport),
                Err(e) => {
                    debug!("Connect to {} failed: {}", destination, e);
                    lease.discard();
                    return Err(e);
                }
            }
        }
        Ok(lease)
    }

    pub fn lease_uri(&self, uri: &str) -> Result<Lease<BlockingTransport>> {
        self.lease(&Destination::from_uri(uri)?)
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn pool(&self) -> &ConnectionPool<BlockingTransport> {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("trust", &self.settings.trust)
            .finish_non_exhaustive()
    }
}
