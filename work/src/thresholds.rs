//! Message-kind-aware PoW difficulty thresholds.
//!
//! Different message kinds carry different costs:
//! - Handshake requests are the most expensive: each one makes the
//!   receiver hold a socket open.
//! - Application messages cost more than control traffic because they
//!   fan out to every listener.
//! - Ping, Pong and CloseConnection stay at the base difficulty.

use harbor_messages::MessageKind;

const BASE_THRESHOLD: u64 = 0xFFF0_0000_0000_0000;
const APPLICATION_MULTIPLIER: f64 = 16.0;
const HANDSHAKE_MULTIPLIER: f64 = 64.0;

/// Per-kind PoW thresholds.
///
/// Higher threshold values mean harder work. Multipliers scale difficulty
/// by shrinking the inverse gap (`u64::MAX - threshold`).
#[derive(Clone, Debug, PartialEq)]
pub struct KindThresholds {
    pub base: u64,
    pub application_multiplier: f64,
    pub handshake_multiplier: f64,
}

impl KindThresholds {
    pub fn new() -> Self {
        Self::with_base(BASE_THRESHOLD)
    }

    /// Construct with a custom base (tests, local development networks).
    /// A base of 0 disables proof-of-work entirely.
    pub fn with_base(base: u64) -> Self {
        Self {
            base,
            application_multiplier: APPLICATION_MULTIPLIER,
            handshake_multiplier: HANDSHAKE_MULTIPLIER,
        }
    }

    /// Required work difficulty for a message kind.
    pub fn threshold_for(&self, kind: MessageKind) -> u64 {
        match kind {
            MessageKind::HandshakeRequest | MessageKind::HandshakeResponse => {
                self.multiply(self.handshake_multiplier)
            }
            MessageKind::Application | MessageKind::Authorized => {
                self.multiply(self.application_multiplier)
            }
            MessageKind::Ping | MessageKind::Pong | MessageKind::CloseConnection => self.base,
        }
    }

    fn multiply(&self, multiplier: f64) -> u64 {
        if self.base == 0 {
            return 0;
        }
        let difficulty_inv = u64::MAX - self.base;
        let scaled_inv = (difficulty_inv as f64 / multiplier) as u64;
        u64::MAX - scaled_inv
    }
}

impl Default for KindThresholds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_hardest() {
        let thresholds = KindThresholds::new();
        let handshake = thresholds.threshold_for(MessageKind::HandshakeRequest);
        let application = thresholds.threshold_for(MessageKind::Application);
        assert!(handshake > application);
    }

    #[test]
    fn application_harder_than_ping() {
        let thresholds = KindThresholds::new();
        assert!(
            thresholds.threshold_for(MessageKind::Application)
                > thresholds.threshold_for(MessageKind::Ping)
        );
        assert_eq!(thresholds.threshold_for(MessageKind::Pong), BASE_THRESHOLD);
    }

    #[test]
    fn zero_base_disables_work() {
        let thresholds = KindThresholds::with_base(0);
        for kind in [
            MessageKind::Application,
            MessageKind::HandshakeRequest,
            MessageKind::Ping,
        ] {
            assert_eq!(thresholds.threshold_for(kind), 0);
        }
    }
}
