use std::io;
use std::time::Duration;

use harbor_messages::MessageKind;
use harbor_types::Address;
use harbor_work::AuthorizationError;
use thiserror::Error;

/// Framing and decoding failures on a socket.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Bootstrap, bind and dial failures of a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not initialized")]
    NotInitialized,

    #[error("transport bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("cannot bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("cannot reach {address}: {source}")]
    Unreachable { address: String, source: io::Error },

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("control channel error: {0}")]
    Control(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of the capability exchange on a fresh socket.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected {0} message during handshake")]
    UnexpectedMessage(MessageKind),

    #[error("handshake message failed authorization")]
    Unauthorized,

    #[error("peer reported address {reported} but we dialed {expected}")]
    AddressMismatch { expected: Address, reported: Address },

    #[error("authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Failures on an established connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Failures of a keep-alive ping.
#[derive(Debug, Error)]
pub enum KeepAliveError {
    #[error("no pong within {0:?}")]
    Timeout(Duration),

    #[error("ping cancelled: connection closed")]
    Cancelled,

    #[error("ping could not be sent: {0}")]
    Send(#[source] Box<NodeError>),
}

/// Umbrella error returned by the [`Node`](crate::Node) API.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("node is stopped")]
    Stopped,

    #[error("no capability available: server not initialized")]
    NoCapability,

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How loudly an error reaching the node's error funnel is logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Peer went away (EOF, reset, closed socket). Routine.
    Expected,
    /// A read or dial ran out of time.
    Timeout,
    /// Anything else.
    Unexpected,
}

fn io_severity(error: &io::Error) -> Severity {
    match error.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected => Severity::Expected,
        io::ErrorKind::TimedOut => Severity::Timeout,
        _ => Severity::Unexpected,
    }
}

impl CodecError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Io(e) => io_severity(e),
            _ => Severity::Unexpected,
        }
    }
}

impl TransportError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Timeout(_) => Severity::Timeout,
            Self::Unreachable { source, .. } | Self::Io(source) => io_severity(source),
            _ => Severity::Unexpected,
        }
    }
}

impl HandshakeError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Timeout(_) => Severity::Timeout,
            Self::Codec(e) => e.severity(),
            _ => Severity::Unexpected,
        }
    }
}

impl ConnectionError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Closed => Severity::Expected,
            Self::Codec(e) => e.severity(),
        }
    }
}

impl NodeError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Transport(e) => e.severity(),
            Self::Handshake(e) => e.severity(),
            Self::Connection(e) => e.severity(),
            Self::Io(e) => io_severity(e),
            Self::Stopped => Severity::Expected,
            _ => Severity::Unexpected,
        }
    }
}

impl From<CodecError> for NodeError {
    fn from(e: CodecError) -> Self {
        Self::Connection(ConnectionError::Codec(e))
    }
}
