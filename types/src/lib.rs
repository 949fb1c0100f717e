//! Fundamental types for the Harbor P2P layer.
//!
//! Shared by every other crate in the workspace: transport-specific
//! addresses, transport kinds, the capability exchanged during the
//! handshake, and connection identifiers.

pub mod address;
pub mod capability;
pub mod connection_id;
pub mod error;
pub mod transport;

pub use address::Address;
pub use capability::Capability;
pub use connection_id::ConnectionId;
pub use error::TypesError;
pub use transport::TransportType;
