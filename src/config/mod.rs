use crate::client::settings::default_io_threads;
use crate::client::{Charset, ClientSettings, MessageConstraints, Timeouts, TrustPolicy};
use crate::pool::PoolConfig;
use crate::utils::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub tls: TlsSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_max_total")]
    pub max_total: usize,
    #[serde(default = "default_max_per_destination")]
    pub max_per_destination: usize,
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    #[serde(default)]
    pub time_to_live_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_timeout_ms")]
    pub socket_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long to wait for a free pooled connection
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_max_headers")]
    pub max_headers: usize,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
    #[serde(default)]
    pub io_threads: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(default = "default_trust")]
    pub trust: String, // "webpki", "custom", "insecure-accept-all"
    #[serde(default)]
    pub ca_bundle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String, // "json" or "pretty"
}

// Default values
fn default_max_total() -> usize {
    200
}

fn default_max_per_destination() -> usize {
    20
}

fn default_idle_threshold_secs() -> u64 {
    30
}

fn default_reap_interval_secs() -> u64 {
    5
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_headers() -> usize {
    200
}

fn default_max_line_length() -> usize {
    2000
}

fn default_charset() -> String {
    "UTF-8".to_string()
}

fn default_tcp_nodelay() -> bool {
    true
}

fn default_trust() -> String {
    "webpki".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_total: default_max_total(),
            max_per_destination: default_max_per_destination(),
            idle_threshold_secs: default_idle_threshold_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            time_to_live_secs: None,
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            socket_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_headers: default_max_headers(),
            max_line_length: default_max_line_length(),
            charset: default_charset(),
            tcp_nodelay: default_tcp_nodelay(),
            io_threads: None,
        }
    }
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            trust: default_trust(),
            ca_bundle: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PoolError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| PoolError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let pool = &self.pool;
        if pool.max_total == 0 || pool.max_per_destination == 0 {
            return Err(PoolError::Config(
                "pool.max_total and pool.max_per_destination must be greater than zero".to_string(),
            ));
        }

        if pool.max_per_destination > pool.max_total {
            return Err(PoolError::Config(format!(
                "pool.max_per_destination ({}) cannot exceed pool.max_total ({})",
                pool.max_per_destination, pool.max_total
            )));
        }

        if pool.reap_interval_secs == 0 {
            return Err(PoolError::Config(
                "pool.reap_interval_secs must be greater than zero".to_string(),
            ));
        }

        if pool.time_to_live_secs == Some(0) {
            return Err(PoolError::Config(
                "pool.time_to_live_secs must be greater than zero when set".to_string(),
            ));
        }

        if self.timeouts.connect_timeout_ms == 0 || self.timeouts.socket_timeout_ms == 0 {
            return Err(PoolError::Config(
                "connect and socket timeouts must be greater than zero".to_string(),
            ));
        }

        if self.http.io_threads == Some(0) {
            return Err(PoolError::Config(
                "http.io_threads must be greater than zero when set".to_string(),
            ));
        }

        self.http.charset.parse::<Charset>()?;
        self.trust_policy()?;

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(PoolError::Config(format!(
                "Invalid log format: {}. Must be 'pretty' or 'json'",
                self.logging.format
            )));
        }

        Ok(())
    }

    fn trust_policy(&self) -> Result<TrustPolicy> {
        match self.tls.trust.as_str() {
            "webpki" => Ok(TrustPolicy::WebPki),
            "custom" => {
                let path = self.tls.ca_bundle.as_ref().ok_or_else(|| {
                    PoolError::Config("tls.trust = \"custom\" requires tls.ca_bundle".to_string())
                })?;
                if path.trim().is_empty() {
                    return Err(PoolError::Config(
                        "tls.ca_bundle cannot be empty".to_string(),
                    ));
                }
                Ok(TrustPolicy::CustomRoots(PathBuf::from(path)))
            }
            "insecure-accept-all" => Ok(TrustPolicy::InsecureAcceptAll),
            other => Err(PoolError::Config(format!(
                "Invalid tls.trust: {}. Must be 'webpki', 'custom' or 'insecure-accept-all'",
                other
            ))),
        }
    }

    /// Runtime settings for pool managers and clients.
    pub fn client_settings(&self) -> Result<ClientSettings> {
        Ok(ClientSettings {
            pool: PoolConfig {
                max_total: self.pool.max_total,
                max_per_destination: self.pool.max_per_destination,
                idle_threshold_secs: self.pool.idle_threshold_secs,
                reap_interval_secs: self.pool.reap_interval_secs,
                lease_timeout_ms: self.timeouts.request_timeout_ms,
                time_to_live_secs: self.pool.time_to_live_secs,
            },
            timeouts: Timeouts {
                connect: Duration::from_millis(self.timeouts.connect_timeout_ms),
                socket: Duration::from_millis(self.timeouts.socket_timeout_ms),
            },
            constraints: MessageConstraints {
                max_headers: self.http.max_headers,
                max_line_length: self.http.max_line_length,
            },
            charset: self.http.charset.parse()?,
            tcp_nodelay: self.http.tcp_nodelay,
            trust: self.trust_policy()?,
            io_threads: self.http.io_threads.unwrap_or_else(default_io_threads),
        })
    }

    /// Create example configuration file
    pub fn create_example<P: AsRef<Path>>(path: P) -> Result<()> {
        let example = r#"[pool]
max_total = 200
max_per_destination = 20
idle_threshold_secs = 30   # Idle connections older than this are reaped
reap_interval_secs = 5     # How often the reaper runs
# time_to_live_secs = 300  # Optional hard cap on connection lifetime

[timeouts]
socket_timeout_ms = 30000
connect_timeout_ms = 30000
request_timeout_ms = 30000  # Max wait for a free pooled connection

[http]
max_headers = 200
max_line_length = 2000
charset = "UTF-8"  # Options: "UTF-8", "ISO-8859-1", "US-ASCII"
tcp_nodelay = true
# io_threads = 4   # Async I/O workers; defaults to available CPUs

[tls]
trust = "webpki"  # Options: "webpki", "custom", "insecure-accept-all"
# ca_bundle = "config/ca.pem"  # Required when trust = "custom"

[logging]
level = "info"  # Options: "trace", "debug", "info", "warn", "error"
format = "pretty"  # Options: "pretty", "json"
"#;

        std::fs::write(path.as_ref(), example)
            .map_err(|e| PoolError::Config(format!("Failed to write example config: {}", e)))?;

        Ok(())
    }
}
