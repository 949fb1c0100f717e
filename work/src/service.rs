//! The contract between the network layer and a token policy.

use async_trait::async_trait;
use harbor_messages::{AuthorizationToken, AuthorizedMessage, MessageKind};

use crate::AuthorizationError;

/// Issues and validates per-message authorization tokens.
///
/// `create_token` may be expensive (proof-of-work, remote attestation) and
/// its latency can vary per message kind, so callers await it. Validation
/// is local and synchronous: it runs on the read path of every connection.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    /// Mint a token for a message of the given kind.
    async fn create_token(&self, kind: MessageKind)
        -> Result<AuthorizationToken, AuthorizationError>;

    /// Whether the envelope's token authorizes its inner message.
    fn is_authorized(&self, message: &AuthorizedMessage) -> bool;
}
