//! PoW validation.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use harbor_messages::MessageKind;

type Blake2b256 = Blake2b<U32>;

/// Work value of `input || nonce`: the first eight bytes of its Blake2b-256
/// digest, little-endian.
pub(crate) fn work_value_for_input(input: &[u8], nonce: u64) -> u64 {
    let mut hasher = Blake2b256::new();
    hasher.update(input);
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Work input for a token: the message kind tag followed by the challenge.
pub(crate) fn work_input(kind: MessageKind, challenge: &[u8; 32]) -> [u8; 33] {
    let mut input = [0u8; 33];
    input[0] = kind_tag(kind);
    input[1..].copy_from_slice(challenge);
    input
}

/// Work value of a `(kind, challenge, nonce)` triple.
pub fn work_value(kind: MessageKind, challenge: &[u8; 32], nonce: u64) -> u64 {
    work_value_for_input(&work_input(kind, challenge), nonce)
}

/// Whether `nonce` meets `min_difficulty` for the given kind and challenge.
pub fn validate_work(kind: MessageKind, challenge: &[u8; 32], nonce: u64, min_difficulty: u64) -> bool {
    work_value(kind, challenge, nonce) >= min_difficulty
}

fn kind_tag(kind: MessageKind) -> u8 {
    match kind {
        MessageKind::Application => 1,
        MessageKind::Authorized => 2,
        MessageKind::CloseConnection => 3,
        MessageKind::Ping => 4,
        MessageKind::Pong => 5,
        MessageKind::HandshakeRequest => 6,
        MessageKind::HandshakeResponse => 7,
    }
}
