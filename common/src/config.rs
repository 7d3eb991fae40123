use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        if self.mqtt_host.trim().is_empty() {
            self.mqtt_host = "192.168.1.100".to_string();
        }
        if self.mqtt_port == 0 {
            self.mqtt_port = 1883;
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.mqtt_user.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_restores_broker_defaults() {
        let mut network = NetworkConfig {
            mqtt_host: "  ".to_string(),
            mqtt_port: 0,
            ..NetworkConfig::default()
        };

        network.sanitize();

        assert_eq!(network.mqtt_host, "192.168.1.100");
        assert_eq!(network.mqtt_port, 1883);
    }

    #[test]
    fn sanitize_keeps_configured_broker() {
        let mut network = NetworkConfig {
            mqtt_host: "broker.local".to_string(),
            mqtt_port: 8883,
            ..NetworkConfig::default()
        };

        network.sanitize();

        assert_eq!(network.mqtt_host, "broker.local");
        assert_eq!(network.mqtt_port, 8883);
    }
}
