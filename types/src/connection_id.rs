//! Unique connection identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Random 128-bit identifier assigned to every connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId([u8; 16]);

impl ConnectionId {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_differ() {
        assert_ne!(ConnectionId::random(), ConnectionId::random());
    }

    #[test]
    fn display_is_short_hex() {
        let id = ConnectionId([0xAB; 16]);
        assert_eq!(id.to_string(), "abababababababab");
    }
}
