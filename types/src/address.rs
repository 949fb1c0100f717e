//! Transport-specific endpoint address.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// Identifies an endpoint on one of the supported transports.
///
/// The `host` is an IP address or hostname for clear-net peers, a
/// `<service-id>.onion` name for Tor peers, or a base64 destination for
/// I2P peers. Addresses compare by value and are used as map keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback clear-net address, mostly useful for local nodes and tests.
    pub fn localhost(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the host is a Tor onion service name.
    pub fn is_onion(&self) -> bool {
        self.host.ends_with(".onion")
    }

    /// Whether the host looks like an I2P destination (base64 or `.b32.i2p`).
    pub fn is_i2p(&self) -> bool {
        self.host.ends_with(".i2p") || (self.host.len() > 500 && !self.host.contains('.'))
    }

    /// Shortened rendering for log lines. I2P destinations are several
    /// hundred characters long.
    pub fn print(&self) -> String {
        const MAX_HOST: usize = 24;
        if self.host.chars().count() > MAX_HOST {
            let head: String = self.host.chars().take(MAX_HOST).collect();
            format!("{head}...:{}", self.port)
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = TypesError;

    /// Parse `host:port` (IPv6 hosts in brackets: `[::1]:8000`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TypesError::InvalidAddress(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(TypesError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TypesError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
