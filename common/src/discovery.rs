//! Home Assistant MQTT discovery document for the switch entity.
//!
//! One fixed-shape JSON document, published to the discovery topic on every
//! successful (re)connection so the hub can rebuild the entity after restarts.

use serde::Serialize;
use thiserror::Error;

use crate::topics::{
    DEVICE_NAME, PAYLOAD_OFF, PAYLOAD_ON, PAYLOAD_ONLINE, TOPIC_AVAILABILITY, TOPIC_COMMAND,
    TOPIC_STATE,
};

/// Serialized discovery documents must fit this many bytes.
pub const DISCOVERY_BUFFER_BYTES: usize = 256;

/// Abbreviated field names are the Home Assistant discovery short forms.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPayload {
    pub name: &'static str,
    pub stat_t: &'static str,
    pub cmd_t: &'static str,
    pub avty_t: &'static str,
    pub pl_on: &'static str,
    pub pl_off: &'static str,
    pub pl_avail: &'static str,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("discovery payload is {size} bytes, over the {DISCOVERY_BUFFER_BYTES}-byte budget")]
    Oversized { size: usize },
}

impl DiscoveryPayload {
    pub fn for_device() -> Self {
        Self {
            name: DEVICE_NAME,
            stat_t: TOPIC_STATE,
            cmd_t: TOPIC_COMMAND,
            avty_t: TOPIC_AVAILABILITY,
            pl_on: PAYLOAD_ON,
            pl_off: PAYLOAD_OFF,
            pl_avail: PAYLOAD_ONLINE,
        }
    }

    /// Serializes into the bounded budget, reporting oversize instead of
    /// truncating.
    pub fn serialize(&self) -> Result<Vec<u8>, DiscoveryError> {
        let body = serde_json::to_vec(self)?;
        if body.len() > DISCOVERY_BUFFER_BYTES {
            return Err(DiscoveryError::Oversized { size: body.len() });
        }
        Ok(body)
    }
}
