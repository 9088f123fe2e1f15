use super::settings::ClientSettings;
use super::tls::build_client_config;
use super::transport::{connect_async, AsyncTransport};
use crate::manager::Flavor;
use crate::pool::{ConnectionPool, Destination, Lease, PoolStats};
use crate::utils::error::{PoolError, Result};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Async execution mode.
#[derive(Debug)]
pub struct Async;

/// I/O runtime owned by the async pool. New sockets are registered with its
/// reactor so they stay usable regardless of which runtime leases them.
pub struct AsyncIo {
    runtime: Option<Runtime>,
    handle: Handle,
    tls: TlsConnector,
}

impl Drop for AsyncIo {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Never blocks, so it is safe from inside another runtime
            runtime.shutdown_background();
        }
    }
}

impl Flavor for Async {
    type Transport = AsyncTransport;
    type Io = AsyncIo;
    type Client = AsyncClient;

    const NAME: &'static str = "async";

    fn start_io(settings: &ClientSettings) -> Result<Self::Io> {
        let tls = build_client_config(&settings.trust)
            .map_err(|e| PoolError::Initialization(format!("TLS setup failed: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.io_threads.max(1))
            .thread_name("pooled-http-io")
            .enable_all()
            .build()
            .map_err(|e| PoolError::Initialization(format!("failed to build I/O runtime: {}", e)))?;

        Ok(AsyncIo {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            tls: TlsConnector::from(Arc::new(tls)),
        })
    }

    fn client(
        pool: &ConnectionPool<Self::Transport>,
        settings: &Arc<ClientSettings>,
        io: &Self::Io,
    ) -> Self::Client {
        AsyncClient {
            pool: pool.clone(),
            settings: Arc::clone(settings),
            handle: io.handle.clone(),
            tls: io.tls.clone(),
        }
    }
}

/// Lightweight handle onto the shared async pool. Cheap to clone.
#[derive(Clone)]
pub struct AsyncClient {
    pool: ConnectionPool<AsyncTransport>,
    settings: Arc<ClientSettings>,
    handle: Handle,
    tls: TlsConnector,
}

impl AsyncClient {
    /// Lease a connected transport to `destination`, opening one on a pool miss.
    pub async fn lease(&self, destination: &Destination) -> Result<Lease<AsyncTransport>> {
        let mut lease = self.pool.acquire_async(destination).await?;
        if lease.is_fresh() {
            let connect = connect_async(
                destination.clone(),
                Arc::clone(&self.settings),
                self.tls.clone(),
            );
            let connected = match self.handle.spawn(connect).await {
                Ok(result) => result,
                Err(e) => Err(PoolError::Io(std::io::Error::other(e))),
            };

            match connected {
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

    pub async fn lease_uri(&self, uri: &str) -> Result<Lease<AsyncTransport>> {
        self.lease(&Destination::from_uri(uri)?).await
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn pool(&self) -> &ConnectionPool<AsyncTransport> {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl std::fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncClient")
            .field("trust", &self.settings.trust)
            .finish_non_exhaustive()
    }
}
