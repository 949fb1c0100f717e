use proptest::prelude::*;

use harbor_messages::MessageKind;
use harbor_work::{validate_work, work_value, PowProof};

fn kind_strategy() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Application),
        Just(MessageKind::CloseConnection),
        Just(MessageKind::Ping),
        Just(MessageKind::Pong),
        Just(MessageKind::HandshakeRequest),
    ]
}

proptest! {
    /// Zero difficulty always passes regardless of nonce.
    #[test]
    fn zero_difficulty_always_passes(
        kind in kind_strategy(),
        challenge in prop::array::uniform32(0u8..),
        nonce in any::<u64>(),
    ) {
        prop_assert!(validate_work(kind, &challenge, nonce, 0));
    }

    /// Lower difficulty is easier to meet: if valid at D, then valid at D-1.
    #[test]
    fn lower_difficulty_is_easier(
        kind in kind_strategy(),
        challenge in prop::array::uniform32(0u8..),
        nonce in any::<u64>(),
        difficulty in 1u64..u64::MAX,
    ) {
        if validate_work(kind, &challenge, nonce, difficulty) {
            prop_assert!(validate_work(kind, &challenge, nonce, difficulty - 1));
        }
    }

    /// Validation agrees with the raw work value.
    #[test]
    fn validation_matches_work_value(
        kind in kind_strategy(),
        challenge in prop::array::uniform32(0u8..),
        nonce in any::<u64>(),
    ) {
        let value = work_value(kind, &challenge, nonce);
        prop_assert!(validate_work(kind, &challenge, nonce, value));
    }

    /// Proof decoding never panics on arbitrary bytes.
    #[test]
    fn proof_decoding_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..100)) {
        let _ = PowProof::from_bytes(&bytes);
    }
}
