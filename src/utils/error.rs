use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Connection pool exhausted for {destination} after waiting {waited:?}")]
    Exhausted {
        destination: String,
        waited: Duration,
    },

    #[error("Connection pool is closed")]
    Closed,

    #[error("Pool initialization failed: {0}")]
    Initialization(String),

    #[error("Idle sweep failed: {0}")]
    Sweep(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Capacity errors are worth retrying; everything else is final for this call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }
}

impl From<rustls::Error> for PoolError {
    fn from(err: rustls::Error) -> Self {
        PoolError::Tls(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
