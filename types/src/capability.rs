//! The capability a node advertises during the connection handshake.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Address, TransportType};

/// A node's reachable address plus the transports it supports.
///
/// Created once when a node binds its server and exchanged during the
/// handshake. Never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    address: Address,
    supported_transport_types: BTreeSet<TransportType>,
}

impl Capability {
    pub fn new(
        address: Address,
        supported_transport_types: impl IntoIterator<Item = TransportType>,
    ) -> Self {
        Self {
            address,
            supported_transport_types: supported_transport_types.into_iter().collect(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn supported_transport_types(&self) -> &BTreeSet<TransportType> {
        &self.supported_transport_types
    }

    pub fn supports(&self, transport_type: TransportType) -> bool {
        self.supported_transport_types.contains(&transport_type)
    }
}
