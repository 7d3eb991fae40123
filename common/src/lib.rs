pub mod command;
pub mod config;
pub mod discovery;
pub mod link;
pub mod topics;

pub use command::{IndicatorState, PinLevel};
pub use config::NetworkConfig;
pub use discovery::{DiscoveryError, DiscoveryPayload, DISCOVERY_BUFFER_BYTES};
pub use link::{
    LinkAction, LinkState, LinkSupervisor, AVAILABILITY_INTERVAL_MS, RECEIVE_BUFFER_BYTES,
    RETRY_DELAY_MS,
};
pub use topics::*;
