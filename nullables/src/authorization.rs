//! Nullable authorization: free tokens, optionally refused per kind.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use harbor_messages::{AuthorizationToken, AuthorizedMessage, MessageKind};
use harbor_work::{AuthorizationError, AuthorizationService};

const NULL_PROOF: &[u8] = b"null";

/// Issues tokens instantly and accepts any token it issued itself, except
/// for the kinds it was told to reject.
#[derive(Debug, Default)]
pub struct NullAuthorization {
    rejected: BTreeSet<MessageKind>,
    issued: AtomicUsize,
}

impl NullAuthorization {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that refuses to validate messages of the given kinds.
    pub fn rejecting(kinds: &[MessageKind]) -> Self {
        Self {
            rejected: kinds.iter().copied().collect(),
            issued: AtomicUsize::new(0),
        }
    }

    /// Number of tokens created so far.
    pub fn tokens_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationService for NullAuthorization {
    async fn create_token(
        &self,
        kind: MessageKind,
    ) -> Result<AuthorizationToken, AuthorizationError> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(AuthorizationToken::new(kind, NULL_PROOF.to_vec()))
    }

    fn is_authorized(&self, message: &AuthorizedMessage) -> bool {
        let kind = message.message().kind();
        message.token().kind == kind
            && message.token().proof == NULL_PROOF
            && !self.rejected.contains(&kind)
    }
}
