//! Node and transport configuration with TOML file support.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use harbor_types::TransportType;
use serde::{Deserialize, Serialize};

use crate::codec::MAX_FRAME_SIZE;
use crate::NodeError;

/// Configuration for a Harbor [`Node`](crate::Node).
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Transport this node binds its server on and dials through.
    #[serde(default = "default_transport_type")]
    pub transport_type: TransportType,

    /// Transports advertised in this node's capability.
    #[serde(default = "default_supported_transport_types")]
    pub supported_transport_types: BTreeSet<TransportType>,

    /// Read and handshake timeout for every socket.
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,

    /// Largest frame accepted from a peer, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default)]
    pub transport: TransportConfig,
}

/// Per-transport settings. Part of the key of the transport registry, so two
/// nodes with equal settings share a transport instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub clear_net: ClearNetConfig,
    #[serde(default)]
    pub tor: TorConfig,
    #[serde(default)]
    pub i2p: I2pConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClearNetConfig {
    /// Interface the server listener binds to.
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Host put into the capability. Falls back to `bind_host`.
    #[serde(default)]
    pub advertised_host: Option<String>,

    #[serde(default = "default_clear_net_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TorConfig {
    /// SOCKS5 port of the tor daemon.
    #[serde(default = "default_tor_socks_addr")]
    pub socks_addr: String,

    /// Control port of the tor daemon.
    #[serde(default = "default_tor_control_addr")]
    pub control_addr: String,

    /// `HashedControlPassword` secret. Null authentication when absent.
    #[serde(default)]
    pub control_password: Option<String>,

    #[serde(default = "default_tor_bootstrap_timeout_secs")]
    pub bootstrap_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct I2pConfig {
    /// Address of the SAM bridge.
    #[serde(default = "default_sam_addr")]
    pub sam_addr: String,

    /// Highest SAM protocol version we ask for.
    #[serde(default = "default_sam_version")]
    pub sam_version: String,

    #[serde(default = "default_i2p_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_transport_type() -> TransportType {
    TransportType::ClearNet
}

fn default_supported_transport_types() -> BTreeSet<TransportType> {
    BTreeSet::from([TransportType::ClearNet])
}

fn default_socket_timeout_secs() -> u64 {
    120
}

fn default_max_message_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_clear_net_connect_timeout_secs() -> u64 {
    10
}

fn default_tor_socks_addr() -> String {
    "127.0.0.1:9050".to_string()
}

fn default_tor_control_addr() -> String {
    "127.0.0.1:9051".to_string()
}

fn default_tor_bootstrap_timeout_secs() -> u64 {
    120
}

fn default_sam_addr() -> String {
    "127.0.0.1:7656".to_string()
}

fn default_sam_version() -> String {
    "3.1".to_string()
}

fn default_i2p_connect_timeout_secs() -> u64 {
    60
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    /// A config for `transport_type` that advertises only that transport.
    pub fn for_transport(transport_type: TransportType) -> Self {
        Self {
            transport_type,
            supported_transport_types: BTreeSet::from([transport_type]),
            ..Self::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            transport_type: default_transport_type(),
            supported_transport_types: default_supported_transport_types(),
            socket_timeout_secs: default_socket_timeout_secs(),
            max_message_size: default_max_message_size(),
            transport: TransportConfig::default(),
        }
    }
}

impl ClearNetConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn advertised_host(&self) -> &str {
        self.advertised_host.as_deref().unwrap_or(&self.bind_host)
    }
}

impl Default for ClearNetConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            advertised_host: None,
            connect_timeout_secs: default_clear_net_connect_timeout_secs(),
        }
    }
}

impl TorConfig {
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_addr: default_tor_socks_addr(),
            control_addr: default_tor_control_addr(),
            control_password: None,
            bootstrap_timeout_secs: default_tor_bootstrap_timeout_secs(),
        }
    }
}

impl I2pConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for I2pConfig {
    fn default() -> Self {
        Self {
            sam_addr: default_sam_addr(),
            sam_version: default_sam_version(),
            connect_timeout_secs: default_i2p_connect_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = NodeConfig::default();
        let toml_str = config.to_toml_string().expect("should serialize");
        let parsed = NodeConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.transport_type, TransportType::ClearNet);
        assert_eq!(config.socket_timeout(), Duration::from_secs(120));
        assert_eq!(config.max_message_size, MAX_FRAME_SIZE);
        assert_eq!(config.transport.tor.socks_addr, "127.0.0.1:9050");
        assert_eq!(config.transport.i2p.sam_addr, "127.0.0.1:7656");
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            transport_type = "tor"
            supported_transport_types = ["tor", "i2p"]
            socket_timeout_secs = 30

            [transport.tor]
            control_password = "hunter2"
        "#;
        let config = NodeConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.transport_type, TransportType::Tor);
        assert_eq!(
            config.supported_transport_types,
            BTreeSet::from([TransportType::Tor, TransportType::I2p])
        );
        assert_eq!(config.socket_timeout_secs, 30);
        assert_eq!(
            config.transport.tor.control_password.as_deref(),
            Some("hunter2")
        );
        assert_eq!(config.transport.tor.control_addr, "127.0.0.1:9051"); // default
    }

    #[test]
    fn advertised_host_falls_back_to_bind_host() {
        let mut clear_net = ClearNetConfig::default();
        assert_eq!(clear_net.advertised_host(), "127.0.0.1");
        clear_net.advertised_host = Some("203.0.113.7".into());
        assert_eq!(clear_net.advertised_host(), "203.0.113.7");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "socket_timeout_secs = 5").unwrap();
        let config = NodeConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.socket_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn saved_config_reloads() {
        let config = NodeConfig {
            socket_timeout_secs: 7,
            ..NodeConfig::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", config.to_toml_string().unwrap()).unwrap();
        assert_eq!(NodeConfig::from_toml_file(file.path()).unwrap(), config);
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = NodeConfig::from_toml_file("/nonexistent/harbor.toml");
        assert!(matches!(result, Err(NodeError::Config(_))));
    }
}
