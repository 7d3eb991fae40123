pub const DEVICE_NAME: &str = "Washing Machine";
pub const MQTT_CLIENT_ID: &str = "washer-node";

pub const TOPIC_STATE: &str = "homeassistant/switch/washing_machine";
pub const TOPIC_COMMAND: &str = "homeassistant/switch/washing_machine/set";
pub const TOPIC_AVAILABILITY: &str = "homeassistant/switch/washing_machine/available";
pub const TOPIC_DISCOVERY: &str = "homeassistant/switch/washing_machine/config";

/// Broadcast by the hub, e.g. when Home Assistant restarts.
pub const TOPIC_HA_STATUS: &str = "homeassistant/status";

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";
