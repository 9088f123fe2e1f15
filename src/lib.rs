// pooled-http - Pooled HTTP connection manager with background idle reaping

pub mod client;
pub mod config;
pub mod manager;
pub mod pool;
pub mod reaper;
pub mod utils;

// Re-export commonly used types
pub use client::{AsyncClient, Client, ClientSettings, TrustPolicy};
pub use manager::{global, ManagerState, PoolManager};
pub use pool::{ConnectionPool, Destination, Lease, PoolConfig, PoolStats};
pub use utils::error::{PoolError, Result};
