use crate::pool::PoolConfig;
use crate::utils::error::{PoolError, Result};
use rustls::client::danger::ServerCertVerifier;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Everything a client flavor needs besides the pool itself.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub pool: PoolConfig,
    pub timeouts: Timeouts,
    pub constraints: MessageConstraints,
    pub charset: Charset,
    pub tcp_nodelay: bool,
    pub trust: TrustPolicy,
    /// Worker threads for the async flavor's I/O runtime
    pub io_threads: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            timeouts: Timeouts::default(),
            constraints: MessageConstraints::default(),
            charset: Charset::Utf8,
            tcp_nodelay: true,
            trust: TrustPolicy::WebPki,
            io_threads: default_io_threads(),
        }
    }
}

impl ClientSettings {
    pub fn with_trust(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

pub fn default_io_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Read/write timeout applied to blocking sockets
    pub socket: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(30_000),
            socket: Duration::from_millis(30_000),
        }
    }
}

/// Limits the HTTP layer enforces when reading a response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageConstraints {
    pub max_headers: usize,
    pub max_line_length: usize,
}

impl Default for MessageConstraints {
    fn default() -> Self {
        Self {
            max_headers: 200,
            max_line_length: 2000,
        }
    }
}

impl MessageConstraints {
    pub fn check_line(&self, line: &[u8]) -> Result<()> {
        if line.len() > self.max_line_length {
            return Err(PoolError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "line of {} bytes exceeds limit of {}",
                    line.len(),
                    self.max_line_length
                ),
            )));
        }
        Ok(())
    }

    pub fn check_header_count(&self, count: usize) -> Result<()> {
        if count > self.max_headers {
            return Err(PoolError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} headers exceed limit of {}", count, self.max_headers),
            )));
        }
        Ok(())
    }
}

/// Character encoding used for message text. Malformed or unmappable input is
/// replaced rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    Latin1,
    Ascii,
}

impl Charset {
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
        }
    }

    pub fn decode_lossy(self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Charset::Ascii => bytes
                .iter()
                .map(|&b| {
                    if b.is_ascii() {
                        char::from(b)
                    } else {
                        char::REPLACEMENT_CHARACTER
                    }
                })
                .collect(),
        }
    }
}

impl FromStr for Charset {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Charset::Latin1),
            "us-ascii" | "ascii" => Ok(Charset::Ascii),
            other => Err(PoolError::Config(format!("Unsupported charset: {}", other))),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How server certificates are validated for `https` destinations.
#[derive(Clone, Default)]
pub enum TrustPolicy {
    /// Mozilla root store bundled with the crate
    #[default]
    WebPki,
    /// Roots loaded from a PEM bundle
    CustomRoots(PathBuf),
    /// Caller-supplied validation strategy
    Verifier(Arc<dyn ServerCertVerifier>),
    /// INSECURE: accept any certificate for any host. Only for talking to
    /// test servers with self-signed certificates.
    InsecureAcceptAll,
}

impl TrustPolicy {
    pub fn is_insecure(&self) -> bool {
        matches!(self, TrustPolicy::InsecureAcceptAll)
    }
}

impl fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustPolicy::WebPki => f.write_str("WebPki"),
            TrustPolicy::CustomRoots(path) => f.debug_tuple("CustomRoots").field(path).finish(),
            TrustPolicy::Verifier(verifier) => f.debug_tuple("Verifier").field(verifier).finish(),
            TrustPolicy::InsecureAcceptAll => f.write_str("InsecureAcceptAll"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = ClientSettings::default();
        assert_eq!(settings.pool.max_total, 200);
        assert_eq!(settings.pool.max_per_destination, 20);
        assert_eq!(settings.timeouts.connect, Duration::from_secs(30));
        assert_eq!(settings.constraints.max_headers, 200);
        assert_eq!(settings.constraints.max_line_length, 2000);
        assert_eq!(settings.charset, Charset::Utf8);
        assert!(settings.tcp_nodelay);
        assert!(!settings.trust.is_insecure());
        assert!(settings.io_threads >= 1);
    }

    #[test]
    fn charset_decoding_ignores_malformed_input() {
        assert_eq!(Charset::Utf8.decode_lossy(b"ok\xff"), "ok\u{fffd}");
        assert_eq!(Charset::Latin1.decode_lossy(b"caf\xe9"), "café");
        assert_eq!(Charset::Ascii.decode_lossy(b"a\x80"), "a\u{fffd}");
    }

    #[test]
    fn charset_names_parse() {
        assert_eq!("UTF-8".parse::<Charset>().unwrap(), Charset::Utf8);
        assert_eq!("iso_8859_1".parse::<Charset>().unwrap(), Charset::Latin1);
        assert!("ebcdic".parse::<Charset>().is_err());
    }

    #[test]
    fn message_constraints_enforce_limits() {
        let limits = MessageConstraints {
            max_headers: 2,
            max_line_length: 4,
        };
        assert!(limits.check_line(b"abcd").is_ok());
        assert!(limits.check_line(b"abcde").is_err());
        assert!(limits.check_header_count(2).is_ok());
        assert!(limits.check_header_count(3).is_err());
    }
}
