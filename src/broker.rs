use std::{fmt, str::FromStr};

use eyre::eyre;
use serde::{Deserialize, Serialize};

use crate::mqtt::connection::ConnectionKey;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Preset,
    Custom,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WsProtocol {
    Ws,
    #[default]
    Wss,
}

impl fmt::Display for WsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsProtocol::Ws => f.write_str("ws"),
            WsProtocol::Wss => f.write_str("wss"),
        }
    }
}

impl FromStr for WsProtocol {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ws" => Ok(WsProtocol::Ws),
            "wss" => Ok(WsProtocol::Wss),
            other => Err(eyre!("Unknown protocol '{}' (expected ws or wss)", other)),
        }
    }
}

/// A well-known public broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokerPreset {
    pub name: &'static str,
    pub url: &'static str,
    pub port: u16,
    pub ws_url: &'static str,
    pub description: &'static str,
}

pub const BROKER_PRESETS: [BrokerPreset; 3] = [
    BrokerPreset {
        name: "EMQX",
        url: "broker.emqx.io",
        port: 1883,
        ws_url: "wss://broker.emqx.io:8084/mqtt",
        description: "Public broker by EMQX",
    },
    BrokerPreset {
        name: "HiveMQ",
        url: "broker.hivemq.com",
        port: 1883,
        ws_url: "wss://broker.hivemq.com:8884/mqtt",
        description: "Public broker by HiveMQ",
    },
    BrokerPreset {
        name: "Mosquitto",
        url: "test.mosquitto.org",
        port: 1883,
        ws_url: "wss://test.mosquitto.org:8081/mqtt",
        description: "Eclipse Mosquitto Test Broker",
    },
];

/// Looks a preset up by name, case-insensitively.
pub fn find_preset(name: &str) -> Option<&'static BrokerPreset> {
    BROKER_PRESETS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name))
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    pub mqtt_broker: String,
    pub mqtt_username: String,
    pub mqtt_password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<WsProtocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub mode: ConnectionMode,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            mqtt_broker: BROKER_PRESETS[0].ws_url.to_string(),
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            protocol: None,
            host: None,
            port: None,
            path: None,
            mode: ConnectionMode::Preset,
        }
    }
}

impl BrokerSettings {
    /// The URL to connect to. Empty when custom mode has no host yet.
    pub fn broker_url(&self) -> String {
        match self.mode {
            ConnectionMode::Preset => self.mqtt_broker.trim().to_string(),
            ConnectionMode::Custom => {
                let host = self.host.as_deref().unwrap_or_default().trim();
                if host.is_empty() {
                    return String::new();
                }

                let protocol = self.protocol.unwrap_or_default();
                let path = self.path.as_deref().unwrap_or_default().trim();

                match self.port.as_deref().map(str::trim) {
                    Some(port) if !port.is_empty() => {
                        format!("{}://{}:{}{}", protocol, host, port, path)
                    }
                    _ => format!("{}://{}{}", protocol, host, path),
                }
            }
        }
    }

    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey {
            url: self.broker_url(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
        }
    }

    pub fn select_preset(&mut self, preset: &BrokerPreset) {
        self.mqtt_broker = preset.ws_url.to_string();
        self.mode = ConnectionMode::Preset;
    }

    pub fn use_custom(
        &mut self,
        protocol: WsProtocol,
        host: impl Into<String>,
        port: impl Into<String>,
        path: impl Into<String>,
    ) {
        self.protocol = Some(protocol);
        self.host = Some(host.into());
        self.port = Some(port.into());
        self.path = Some(path.into());
        self.mode = ConnectionMode::Custom;
    }

    pub fn active_preset(&self) -> Option<&'static BrokerPreset> {
        match self.mode {
            ConnectionMode::Preset => BROKER_PRESETS
                .iter()
                .find(|preset| preset.ws_url == self.mqtt_broker),
            ConnectionMode::Custom => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_preset() {
        let settings = BrokerSettings::default();

        assert_eq!(settings.broker_url(), "wss://broker.emqx.io:8084/mqtt");
        assert_eq!(settings.active_preset().map(|p| p.name), Some("EMQX"));
    }

    #[test]
    fn custom_url_is_assembled_from_parts() {
        let mut settings = BrokerSettings::default();
        settings.use_custom(WsProtocol::Ws, "192.168.1.10", "9001", "/mqtt");

        assert_eq!(settings.broker_url(), "ws://192.168.1.10:9001/mqtt");
        assert_eq!(settings.active_preset(), None);

        settings.port = None;
        assert_eq!(settings.broker_url(), "ws://192.168.1.10/mqtt");

        settings.host = Some(" ".to_string());
        assert_eq!(settings.broker_url(), "");
    }

    #[test]
    fn selecting_a_preset_leaves_custom_mode() {
        let mut settings = BrokerSettings::default();
        settings.use_custom(WsProtocol::Wss, "example.org", "443", "");
        settings.select_preset(find_preset("MOSQUITTO").unwrap());

        assert_eq!(settings.mode, ConnectionMode::Preset);
        assert_eq!(settings.broker_url(), "wss://test.mosquitto.org:8081/mqtt");
    }

    #[test]
    fn loads_partial_settings_json() {
        let settings: BrokerSettings =
            serde_json::from_str(r#"{"mqttBroker":"ws://localhost:9001","mqttUsername":"u"}"#)
                .unwrap();

        assert_eq!(settings.broker_url(), "ws://localhost:9001");
        assert_eq!(settings.mqtt_username, "u");
        assert_eq!(settings.mqtt_password, "");
        assert_eq!(settings.mode, ConnectionMode::Preset);

        let json = serde_json::to_value(&settings).unwrap();
        assert!(json.get("host").is_none());
        assert_eq!(json["mode"], "preset");
    }
}
