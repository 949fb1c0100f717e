//! Pluggable transports.
//!
//! A [`Transport`] turns a port into a listening socket with a public
//! [`Address`] and an [`Address`] into a connected stream. Tor and I2P reach
//! their networks through a locally running daemon; ClearNet is plain TCP.

mod clear_net;
mod i2p;
mod registry;
mod socks;
mod tor;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use harbor_types::{Address, TransportType};
use tokio::net::{TcpListener, TcpStream};

use crate::config::TransportConfig;
use crate::TransportError;

pub use clear_net::ClearNetTransport;
pub use i2p::I2pTransport;
pub use registry::TransportRegistry;
pub use socks::socks5_connect;
pub use tor::TorTransport;

/// A bound listener together with the address peers use to reach it.
#[derive(Debug)]
pub struct ServerSocket {
    pub listener: TcpListener,
    /// Publicly reachable address (onion name, I2P destination or IP).
    pub address: Address,
}

/// A SOCKS5 endpoint other components may route traffic through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocksProxy {
    pub address: Address,
}

impl fmt::Display for SocksProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socks5://{}", self.address)
    }
}

#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn transport_type(&self) -> TransportType;

    /// Prepare the transport (connect to the daemon, wait for bootstrap).
    /// Safe to call more than once.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Bind a listener for `port`. `node_id` names the hidden service or
    /// session so rebinding the same node reuses its identity.
    async fn server_socket(&self, port: u16, node_id: &str)
        -> Result<ServerSocket, TransportError>;

    /// Open a stream to `address`.
    async fn socket(&self, address: &Address) -> Result<TcpStream, TransportError>;

    fn socks_proxy(&self) -> Option<SocksProxy> {
        None
    }

    /// Release daemon-side resources. Errors are logged, not returned.
    async fn shutdown(&self);
}

/// Build a fresh transport of `transport_type`.
pub fn create_transport(
    transport_type: TransportType,
    config: &TransportConfig,
) -> Arc<dyn Transport> {
    match transport_type {
        TransportType::ClearNet => Arc::new(ClearNetTransport::new(config.clear_net.clone())),
        TransportType::Tor => Arc::new(TorTransport::new(config.tor.clone())),
        TransportType::I2p => Arc::new(I2pTransport::new(config.i2p.clone())),
    }
}

/// Resolve a `host:port` string from config into an [`Address`].
fn parse_endpoint(endpoint: &str) -> Result<Address, TransportError> {
    endpoint
        .parse()
        .map_err(|e| TransportError::Bootstrap(format!("invalid endpoint {endpoint}: {e}")))
}

/// Connect to a local daemon, mapping failures to [`TransportError::Unreachable`].
async fn connect_daemon(endpoint: &str) -> Result<TcpStream, TransportError> {
    TcpStream::connect(endpoint)
        .await
        .map_err(|source| TransportError::Unreachable {
            address: endpoint.to_string(),
            source,
        })
}

async fn bind_loopback(port: u16) -> Result<TcpListener, TransportError> {
    let address = format!("127.0.0.1:{port}");
    TcpListener::bind(&address)
        .await
        .map_err(|source| TransportError::Bind { address, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_picks_matching_variant() {
        let config = TransportConfig::default();
        for transport_type in TransportType::ALL {
            let transport = create_transport(transport_type, &config);
            assert_eq!(transport.transport_type(), transport_type);
        }
    }

    #[test]
    fn only_tor_offers_socks() {
        let config = TransportConfig::default();
        assert!(create_transport(TransportType::ClearNet, &config)
            .socks_proxy()
            .is_none());
        assert!(create_transport(TransportType::I2p, &config)
            .socks_proxy()
            .is_none());
        let proxy = create_transport(TransportType::Tor, &config)
            .socks_proxy()
            .expect("tor has a socks proxy");
        assert_eq!(proxy.address, Address::localhost(9050));
    }

    #[test]
    fn bad_endpoint_is_bootstrap_error() {
        assert!(matches!(
            parse_endpoint("no-port"),
            Err(TransportError::Bootstrap(_))
        ));
    }
}
