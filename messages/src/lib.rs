//! Wire message types for Harbor node-to-node communication.
//!
//! Every frame on an established connection carries exactly one
//! [`Message`]. Outgoing messages are wrapped in an [`AuthorizedMessage`]
//! envelope carrying an [`AuthorizationToken`] bound to the inner
//! message's [`MessageKind`].

use std::fmt;

use harbor_types::Capability;
use serde::{Deserialize, Serialize};

/// Top-level wire message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Opaque payload owned by a higher-layer protocol.
    Application(ApplicationMessage),
    /// Authorization envelope around another message.
    Authorized(AuthorizedMessage),
    /// Asks the receiver to tear the connection down.
    CloseConnection(CloseConnectionMessage),
    /// Keep-alive request.
    Ping(Ping),
    /// Keep-alive response echoing the request nonce.
    Pong(Pong),
    /// First message of a handshake, sent by the dialing side.
    HandshakeRequest(HandshakeRequest),
    /// Reply of the accepting side.
    HandshakeResponse(HandshakeResponse),
}

impl Message {
    /// The class of this message, used to bind authorization tokens.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Application(_) => MessageKind::Application,
            Self::Authorized(_) => MessageKind::Authorized,
            Self::CloseConnection(_) => MessageKind::CloseConnection,
            Self::Ping(_) => MessageKind::Ping,
            Self::Pong(_) => MessageKind::Pong,
            Self::HandshakeRequest(_) => MessageKind::HandshakeRequest,
            Self::HandshakeResponse(_) => MessageKind::HandshakeResponse,
        }
    }

    pub fn is_close_connection(&self) -> bool {
        matches!(self, Self::CloseConnection(_))
    }
}

impl From<ApplicationMessage> for Message {
    fn from(message: ApplicationMessage) -> Self {
        Self::Application(message)
    }
}

impl From<CloseConnectionMessage> for Message {
    fn from(message: CloseConnectionMessage) -> Self {
        Self::CloseConnection(message)
    }
}

impl From<Ping> for Message {
    fn from(ping: Ping) -> Self {
        Self::Ping(ping)
    }
}

impl From<Pong> for Message {
    fn from(pong: Pong) -> Self {
        Self::Pong(pong)
    }
}

/// Discriminant of [`Message`], stable across releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    Application,
    Authorized,
    CloseConnection,
    Ping,
    Pong,
    HandshakeRequest,
    HandshakeResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Authorized => "authorized",
            Self::CloseConnection => "close_connection",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::HandshakeRequest => "handshake_request",
            Self::HandshakeResponse => "handshake_response",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Application payloads ───────────────────────────────────────────────

/// A higher-layer message. The transport layer never interprets `payload`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationMessage {
    /// Routing hint for listeners (e.g. `"offer"`, `"escrow"`).
    pub topic: String,
    pub payload: Vec<u8>,
}

impl ApplicationMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

// ── Authorization envelope ─────────────────────────────────────────────

/// Opaque per-message proof issued by an authorization service.
///
/// The `proof` bytes are only meaningful to the service that created them;
/// the token is bound to the `kind` of the message it accompanies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationToken {
    pub kind: MessageKind,
    pub proof: Vec<u8>,
}

impl AuthorizationToken {
    pub fn new(kind: MessageKind, proof: Vec<u8>) -> Self {
        Self { kind, proof }
    }
}

/// A message plus the token authorizing it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedMessage {
    message: Box<Message>,
    token: AuthorizationToken,
}

impl AuthorizedMessage {
    pub fn new(message: Message, token: AuthorizationToken) -> Self {
        Self {
            message: Box::new(message),
            token,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn token(&self) -> &AuthorizationToken {
        &self.token
    }

    pub fn into_message(self) -> Message {
        *self.message
    }
}

// ── Connection control ─────────────────────────────────────────────────

/// Why a peer asked to close the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Shutdown,
    TooManyConnections,
    DuplicateConnection,
    ProtocolViolation,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseConnectionMessage {
    pub reason: CloseReason,
}

impl CloseConnectionMessage {
    pub fn new(reason: CloseReason) -> Self {
        Self { reason }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub nonce: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub request_nonce: u32,
}

// ── Handshake ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub capability: Capability,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub capability: Capability,
}
