use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use harbor_types::TransportType;

use super::{create_transport, Transport};
use crate::config::TransportConfig;

/// Shares one transport instance per `(TransportType, TransportConfig)`.
///
/// Nodes created from the same registry with equal transport settings reuse
/// a single daemon connection. The registry is an ordinary value; tests and
/// independent node groups each hold their own.
#[derive(Default)]
pub struct TransportRegistry {
    transports: Mutex<HashMap<(TransportType, TransportConfig), Arc<dyn Transport>>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared transport for this key, creating it on first use.
    pub fn get_or_create(
        &self,
        transport_type: TransportType,
        config: &TransportConfig,
    ) -> Arc<dyn Transport> {
        let mut transports = self
            .transports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        transports
            .entry((transport_type, config.clone()))
            .or_insert_with(|| {
                tracing::debug!(transport = %transport_type, "creating transport");
                create_transport(transport_type, config)
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.transports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
