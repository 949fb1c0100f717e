//! P2P transport and connection layer for Harbor.
//!
//! Reaches peers over Tor, I2P or plain TCP, exchanges capabilities on every
//! new socket, authorizes every message, and tracks the lifecycle of inbound
//! and outbound connections under a single [`Node`].

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod keepalive;
pub mod listeners;
pub mod metrics;
pub mod node;
pub mod server;
pub mod transport;

pub use config::{ClearNetConfig, I2pConfig, NodeConfig, TorConfig, TransportConfig};
pub use connection::{Connection, ConnectionKind};
pub use error::{
    CodecError, ConnectionError, HandshakeError, KeepAliveError, NodeError, Severity,
    TransportError,
};
pub use handshake::ConnectionHandshake;
pub use keepalive::{KeepAliveHandler, PingResponder, KEEP_ALIVE_TIMEOUT};
pub use listeners::{ConnectionListener, ConnectionMessageListener, ListenerRegistry, MessageListener};
pub use metrics::NetworkMetrics;
pub use node::{Node, WeakNode, CLOSE_GRACE, SHUTDOWN_WAIT};
pub use server::Server;
pub use transport::{
    create_transport, ClearNetTransport, I2pTransport, ServerSocket, SocksProxy, TorTransport,
    Transport, TransportRegistry,
};
