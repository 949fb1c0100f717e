//! Transport kinds a node can speak.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TypesError;

/// The network substrate a transport runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Tor,
    I2p,
    ClearNet,
}

impl TransportType {
    pub const ALL: [TransportType; 3] = [Self::Tor, Self::I2p, Self::ClearNet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tor => "tor",
            Self::I2p => "i2p",
            Self::ClearNet => "clear_net",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tor" => Ok(Self::Tor),
            "i2p" => Ok(Self::I2p),
            "clear_net" | "clearnet" => Ok(Self::ClearNet),
            other => Err(TypesError::UnknownTransportType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_display() {
        for transport_type in TransportType::ALL {
            let parsed: TransportType = transport_type.to_string().parse().unwrap();
            assert_eq!(parsed, transport_type);
        }
    }

    #[test]
    fn parse_accepts_clearnet_alias() {
        assert_eq!("ClearNet".parse::<TransportType>(), Ok(TransportType::ClearNet));
        assert!("carrier-pigeon".parse::<TransportType>().is_err());
    }
}
