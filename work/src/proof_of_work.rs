//! Hashcash-style authorization tokens.

use async_trait::async_trait;
use harbor_messages::{AuthorizationToken, AuthorizedMessage, MessageKind};

use crate::validator::work_input;
use crate::{validate_work, AuthorizationError, AuthorizationService, KindThresholds, WorkGenerator};

const PROOF_LEN: usize = 32 + 8 + 8;

/// Decoded proof bytes of a PoW token: `challenge || nonce || difficulty`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowProof {
    pub challenge: [u8; 32],
    pub nonce: u64,
    pub difficulty: u64,
}

impl PowProof {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PROOF_LEN);
        bytes.extend_from_slice(&self.challenge);
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&self.difficulty.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AuthorizationError> {
        if bytes.len() != PROOF_LEN {
            return Err(AuthorizationError::MalformedProof(bytes.len()));
        }
        let mut challenge = [0u8; 32];
        challenge.copy_from_slice(&bytes[..32]);
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&bytes[32..40]);
        let mut difficulty = [0u8; 8];
        difficulty.copy_from_slice(&bytes[40..]);
        Ok(Self {
            challenge,
            nonce: u64::from_le_bytes(nonce),
            difficulty: u64::from_le_bytes(difficulty),
        })
    }
}

/// Authorization service that charges a proof-of-work per message.
///
/// The sender picks a random challenge and searches for a nonce meeting the
/// threshold for the message kind. The receiver recomputes one hash.
pub struct ProofOfWorkAuthorization {
    thresholds: KindThresholds,
}

impl ProofOfWorkAuthorization {
    pub fn new(thresholds: KindThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &KindThresholds {
        &self.thresholds
    }

    /// Check a token against a message kind, reporting why it fails.
    pub fn verify(
        &self,
        token: &AuthorizationToken,
        message_kind: MessageKind,
    ) -> Result<(), AuthorizationError> {
        if token.kind != message_kind {
            return Err(AuthorizationError::KindMismatch {
                token: token.kind.to_string(),
                message: message_kind.to_string(),
            });
        }
        let proof = PowProof::from_bytes(&token.proof)?;
        let minimum = self.thresholds.threshold_for(message_kind);
        if proof.difficulty < minimum {
            return Err(AuthorizationError::InsufficientDifficulty {
                actual: proof.difficulty,
                minimum,
            });
        }
        if !validate_work(message_kind, &proof.challenge, proof.nonce, proof.difficulty) {
            return Err(AuthorizationError::InsufficientDifficulty {
                actual: crate::work_value(message_kind, &proof.challenge, proof.nonce),
                minimum: proof.difficulty,
            });
        }
        Ok(())
    }
}

impl Default for ProofOfWorkAuthorization {
    fn default() -> Self {
        Self::new(KindThresholds::default())
    }
}

#[async_trait]
impl AuthorizationService for ProofOfWorkAuthorization {
    async fn create_token(
        &self,
        kind: MessageKind,
    ) -> Result<AuthorizationToken, AuthorizationError> {
        let difficulty = self.thresholds.threshold_for(kind);
        let challenge: [u8; 32] = rand::random();
        let nonce = tokio::task::spawn_blocking(move || {
            WorkGenerator.generate(&work_input(kind, &challenge), difficulty)
        })
        .await
        .map_err(|e| AuthorizationError::GenerationFailed(e.to_string()))??;

        let proof = PowProof {
            challenge,
            nonce: nonce.0,
            difficulty,
        };
        tracing::trace!(%kind, difficulty, "authorization token created");
        Ok(AuthorizationToken::new(kind, proof.to_bytes()))
    }

    fn is_authorized(&self, message: &AuthorizedMessage) -> bool {
        match self.verify(message.token(), message.message().kind()) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "authorization check failed");
                false
            }
        }
    }
}
