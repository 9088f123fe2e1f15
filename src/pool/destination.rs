use crate::utils::error::{PoolError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// URI scheme of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn is_secure(self) -> bool {
        matches!(self, Scheme::Https)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl FromStr for Scheme {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(PoolError::InvalidDestination(format!(
                "unsupported scheme '{}'",
                other
            ))),
        }
    }
}

/// Route key for pooled connections: scheme, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Destination {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Destination {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::new(Scheme::Http, host, port)
    }

    pub fn https(host: impl Into<String>, port: u16) -> Self {
        Self::new(Scheme::Https, host, port)
    }

    /// Parse the route part of an absolute URI such as `https://example.com:8443/path?q`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| PoolError::InvalidDestination(format!("{}: {}", reason, uri));

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let scheme: Scheme = scheme.parse()?;

        let authority = rest
            .split(|c| matches!(c, '/' | '?' | '#'))
            .next()
            .unwrap_or_default();
        // Drop userinfo
        let authority = authority.rsplit('@').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid("missing host"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port),
                None if tail.is_empty() => None,
                None => return Err(invalid("garbage after IPv6 literal")),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(p) if !p.is_empty() => p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            _ => scheme.default_port(),
        };

        Ok(Self::new(scheme, host, port))
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` suitable for socket address resolution.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

impl FromStr for Destination {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_uri(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_ports() {
        let d = Destination::from_uri("http://Example.com/index.html").unwrap();
        assert_eq!(d, Destination::http("example.com", 80));

        let d = Destination::from_uri("https://example.com").unwrap();
        assert_eq!(d.port(), 443);
        assert!(d.scheme().is_secure());
    }

    #[test]
    fn parses_explicit_port_and_userinfo() {
        let d = Destination::from_uri("https://user:pw@api.example.com:8443/v1?x=1").unwrap();
        assert_eq!(d.host(), "api.example.com");
        assert_eq!(d.port(), 8443);
    }

    #[test]
    fn parses_ipv6_literal() {
        let d = Destination::from_uri("http://[::1]:8080/").unwrap();
        assert_eq!(d.host(), "::1");
        assert_eq!(d.port(), 8080);
        assert_eq!(d.authority(), "[::1]:8080");
        assert_eq!(d.to_string(), "http://[::1]:8080");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Destination::from_uri("example.com").is_err());
        assert!(Destination::from_uri("ftp://example.com").is_err());
        assert!(Destination::from_uri("http://").is_err());
        assert!(Destination::from_uri("http://host:99999").is_err());
        assert!(Destination::from_uri("http://[::1").is_err());
    }
}
