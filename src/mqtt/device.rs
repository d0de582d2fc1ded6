use std::{fmt, str::FromStr};

use derive_builder::Builder;
use eyre::eyre;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ON_MESSAGE: &str = "ON";
pub const DEFAULT_OFF_MESSAGE: &str = "OFF";
pub const DEFAULT_BUTTON_MESSAGE: &str = "PRESSED";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Switch,
    Slider,
    Button,
    Read,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Switch => "switch",
            DeviceType::Slider => "slider",
            DeviceType::Button => "button",
            DeviceType::Read => "read",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "switch" => Ok(DeviceType::Switch),
            "slider" => Ok(DeviceType::Slider),
            "button" => Ok(DeviceType::Button),
            "read" => Ok(DeviceType::Read),
            other => Err(eyre!(
                "Unknown device type '{}' (expected switch, slider, button or read)",
                other
            )),
        }
    }
}

/// Last known state of a device.
///
/// Switches hold a `Bool`, sliders a `Number`, read-only devices whatever the
/// last inbound payload parsed to.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DeviceValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl DeviceValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            DeviceValue::Bool(value) => *value,
            DeviceValue::Number(value) => *value != 0.0 && !value.is_nan(),
            DeviceValue::Text(value) => !value.is_empty(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            DeviceValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            DeviceValue::Number(value) => Some(*value),
            DeviceValue::Text(value) => value.trim().parse().ok(),
        }
    }
}

impl fmt::Display for DeviceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceValue::Bool(value) => write!(f, "{}", value),
            DeviceValue::Number(value) => write!(f, "{}", value),
            DeviceValue::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Icon {
    Sun,
    Moon,
    Thermometer,
    Fan,
    Droplet,
    Lock,
    Unlock,
    Lightbulb,
    #[default]
    Power,
    Wifi,
    Bell,
    Camera,
    Tv,
    Speaker,
    Coffee,
}

impl Icon {
    pub const ALL: [Icon; 15] = [
        Icon::Sun,
        Icon::Moon,
        Icon::Thermometer,
        Icon::Fan,
        Icon::Droplet,
        Icon::Lock,
        Icon::Unlock,
        Icon::Lightbulb,
        Icon::Power,
        Icon::Wifi,
        Icon::Bell,
        Icon::Camera,
        Icon::Tv,
        Icon::Speaker,
        Icon::Coffee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Icon::Sun => "sun",
            Icon::Moon => "moon",
            Icon::Thermometer => "thermometer",
            Icon::Fan => "fan",
            Icon::Droplet => "droplet",
            Icon::Lock => "lock",
            Icon::Unlock => "unlock",
            Icon::Lightbulb => "lightbulb",
            Icon::Power => "power",
            Icon::Wifi => "wifi",
            Icon::Bell => "bell",
            Icon::Camera => "camera",
            Icon::Tv => "tv",
            Icon::Speaker => "speaker",
            Icon::Coffee => "coffee",
        }
    }
}

impl FromStr for Icon {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        Icon::ALL
            .into_iter()
            .find(|icon| icon.as_str() == s)
            .ok_or_else(|| eyre!("Unknown icon '{}'", s))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchConfig {
    pub on_message: String,
    pub off_message: String,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            on_message: DEFAULT_ON_MESSAGE.to_string(),
            off_message: DEFAULT_OFF_MESSAGE.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SliderConfig {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub unit: Option<String>,
}

impl Default for SliderConfig {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 100.0,
            step: 1.0,
            unit: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ButtonConfig {
    pub message: String,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            message: DEFAULT_BUTTON_MESSAGE.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadConfig {
    pub unit: Option<String>,
}

/// Device type together with its type-specific configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceKind {
    Switch(SwitchConfig),
    Slider(SliderConfig),
    Button(ButtonConfig),
    Read(ReadConfig),
}

impl Default for DeviceKind {
    fn default() -> Self {
        DeviceKind::Switch(SwitchConfig::default())
    }
}

impl DeviceKind {
    pub fn device_type(&self) -> DeviceType {
        match self {
            DeviceKind::Switch(_) => DeviceType::Switch,
            DeviceKind::Slider(_) => DeviceType::Slider,
            DeviceKind::Button(_) => DeviceType::Button,
            DeviceKind::Read(_) => DeviceType::Read,
        }
    }

    /// Whether devices of this kind are updated from inbound broker messages,
    /// and therefore need their topic subscribed.
    pub fn receives_updates(&self) -> bool {
        matches!(self, DeviceKind::Switch(_) | DeviceKind::Read(_))
    }

    pub fn initial_value(&self) -> Option<DeviceValue> {
        match self {
            DeviceKind::Switch(_) => Some(DeviceValue::Bool(false)),
            DeviceKind::Slider(config) => Some(DeviceValue::Number(config.min)),
            DeviceKind::Button(_) | DeviceKind::Read(_) => None,
        }
    }

    pub fn unit(&self) -> Option<&str> {
        match self {
            DeviceKind::Slider(SliderConfig { unit, .. })
            | DeviceKind::Read(ReadConfig { unit }) => unit.as_deref(),
            DeviceKind::Switch(_) | DeviceKind::Button(_) => None,
        }
    }

    fn from_record(device_type: DeviceType, config: DeviceConfig) -> Self {
        match device_type {
            DeviceType::Switch => {
                let defaults = SwitchConfig::default();
                DeviceKind::Switch(SwitchConfig {
                    on_message: config.on_message.unwrap_or(defaults.on_message),
                    off_message: config.off_message.unwrap_or(defaults.off_message),
                })
            }
            DeviceType::Slider => {
                let defaults = SliderConfig::default();
                DeviceKind::Slider(SliderConfig {
                    min: config.min.unwrap_or(defaults.min),
                    max: config.max.unwrap_or(defaults.max),
                    step: config.step.unwrap_or(defaults.step),
                    unit: config.unit,
                })
            }
            DeviceType::Button => DeviceKind::Button(ButtonConfig {
                message: config
                    .button_message
                    .unwrap_or_else(|| DEFAULT_BUTTON_MESSAGE.to_string()),
            }),
            DeviceType::Read => DeviceKind::Read(ReadConfig { unit: config.unit }),
        }
    }

    fn to_record(&self) -> DeviceConfig {
        match self {
            DeviceKind::Switch(config) => DeviceConfig {
                on_message: Some(config.on_message.clone()),
                off_message: Some(config.off_message.clone()),
                ..Default::default()
            },
            DeviceKind::Slider(config) => DeviceConfig {
                min: Some(config.min),
                max: Some(config.max),
                step: Some(config.step),
                unit: config.unit.clone(),
                ..Default::default()
            },
            DeviceKind::Button(config) => DeviceConfig {
                button_message: Some(config.message.clone()),
                ..Default::default()
            },
            DeviceKind::Read(config) => DeviceConfig {
                unit: config.unit.clone(),
                ..Default::default()
            },
        }
    }
}

/// Persisted `config` object. Every key is optional, absent keys fall back to
/// the per-type defaults.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    on_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    off_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    button_message: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct DeviceRecord {
    id: String,
    name: String,
    #[serde(rename = "type")]
    device_type: DeviceType,
    topic: String,
    #[serde(default)]
    value: Option<DeviceValue>,
    #[serde(default)]
    icon: Icon,
    #[serde(default)]
    config: DeviceConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(from = "DeviceRecord", into = "DeviceRecord")]
pub struct Device {
    pub id: String,
    pub name: String,
    pub icon: Icon,
    pub topic: String,
    pub kind: DeviceKind,
    pub value: Option<DeviceValue>,
}

impl Device {
    pub fn from_new(id: String, new: NewDevice) -> Self {
        let value = new.kind.initial_value();

        Device {
            id,
            name: new.name,
            icon: new.icon,
            topic: new.topic,
            kind: new.kind,
            value,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.kind.device_type()
    }

    /// Applies the same topic and slider rules as [`NewDeviceBuilder`] to a
    /// record that came from storage or an import.
    pub fn validate(&self) -> eyre::Result<()> {
        check_topic(&self.topic)
            .and_then(|()| check_kind(&self.kind))
            .map_err(|e| eyre!("Invalid device '{}': {}", self.id, e))
    }
}

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        Device {
            id: record.id,
            name: record.name,
            icon: record.icon,
            topic: record.topic,
            kind: DeviceKind::from_record(record.device_type, record.config),
            value: record.value,
        }
    }
}

impl From<Device> for DeviceRecord {
    fn from(device: Device) -> Self {
        DeviceRecord {
            id: device.id,
            name: device.name,
            device_type: device.kind.device_type(),
            topic: device.topic,
            value: device.value,
            icon: device.icon,
            config: device.kind.to_record(),
        }
    }
}

/// User-supplied fields of a device, used both to create a device and to
/// fully edit an existing one.
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct NewDevice {
    pub name: String,
    pub topic: String,
    #[builder(default)]
    pub icon: Icon,
    #[builder(default)]
    pub kind: DeviceKind,
}

impl NewDeviceBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err("Device name must not be empty".to_string());
            }
        }

        if let Some(topic) = &self.topic {
            check_topic(topic)?;
        }

        if let Some(kind) = &self.kind {
            check_kind(kind)?;
        }

        Ok(())
    }
}

fn check_topic(topic: &str) -> Result<(), String> {
    if topic.trim().is_empty() {
        return Err("Device topic must not be empty".to_string());
    }
    if topic.contains(['+', '#']) {
        return Err(format!(
            "Device topic '{}' must not contain MQTT wildcards",
            topic
        ));
    }

    Ok(())
}

fn check_kind(kind: &DeviceKind) -> Result<(), String> {
    if let DeviceKind::Slider(config) = kind {
        if config.min >= config.max {
            return Err(format!(
                "Slider min ({}) must be below max ({})",
                config.min, config.max
            ));
        }
        if config.step <= 0.0 {
            return Err(format!("Slider step ({}) must be positive", config.step));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_persisted_record_shape() {
        let json = r#"[
            {"id":"1","name":"Lamp","type":"switch","topic":"home/lamp","value":true,
             "icon":"lightbulb","config":{"onMessage":"ENCENDER","offMessage":"APAGAR"}},
            {"id":"2","name":"Dimmer","type":"slider","topic":"home/dim","value":40,
             "icon":"sun","config":{"min":10,"unit":"%"}},
            {"id":"3","name":"Bell","type":"button","topic":"home/bell","value":false,
             "icon":"bell","config":{}},
            {"id":"4","name":"Temp","type":"read","topic":"home/temp","value":"n/a",
             "icon":"thermometer"}
        ]"#;

        let devices: Vec<Device> = serde_json::from_str(json).unwrap();

        assert_eq!(
            devices[0].kind,
            DeviceKind::Switch(SwitchConfig {
                on_message: "ENCENDER".to_string(),
                off_message: "APAGAR".to_string(),
            })
        );
        assert_eq!(devices[0].value, Some(DeviceValue::Bool(true)));
        assert_eq!(
            devices[1].kind,
            DeviceKind::Slider(SliderConfig {
                min: 10.0,
                max: 100.0,
                step: 1.0,
                unit: Some("%".to_string()),
            })
        );
        assert_eq!(devices[1].value, Some(DeviceValue::Number(40.0)));
        assert_eq!(devices[2].kind, DeviceKind::Button(ButtonConfig::default()));
        assert_eq!(devices[3].kind, DeviceKind::Read(ReadConfig { unit: None }));
        assert_eq!(devices[3].value, Some(DeviceValue::Text("n/a".to_string())));
    }

    #[test]
    fn serializes_type_and_camel_case_config() {
        let device = Device {
            id: "7".to_string(),
            name: "Bell".to_string(),
            icon: Icon::Bell,
            topic: "home/bell".to_string(),
            kind: DeviceKind::Button(ButtonConfig {
                message: "RING".to_string(),
            }),
            value: None,
        };

        let json = serde_json::to_value(&device).unwrap();

        assert_eq!(json["type"], "button");
        assert_eq!(json["icon"], "bell");
        assert_eq!(json["config"]["buttonMessage"], "RING");
        assert!(json["config"].get("onMessage").is_none());

        let back: Device = serde_json::from_value(json).unwrap();
        assert_eq!(back, device);
    }

    #[test]
    fn builder_rejects_invalid_devices() {
        assert!(NewDeviceBuilder::default()
            .name("  ")
            .topic("home/x")
            .build()
            .is_err());
        assert!(NewDeviceBuilder::default()
            .name("X")
            .topic("home/#")
            .build()
            .is_err());
        assert!(NewDeviceBuilder::default()
            .name("X")
            .topic("home/x")
            .kind(DeviceKind::Slider(SliderConfig {
                min: 5.0,
                max: 5.0,
                ..Default::default()
            }))
            .build()
            .is_err());

        let device = NewDeviceBuilder::default()
            .name("X")
            .topic("home/x")
            .build()
            .unwrap();
        assert_eq!(device.icon, Icon::Power);
        assert_eq!(device.kind, DeviceKind::Switch(SwitchConfig::default()));
    }

    #[test]
    fn stored_records_follow_builder_rules() {
        let json = r#"[
            {"id":"1","name":"Lamp","type":"switch","topic":"home/lamp"},
            {"id":"2","name":"Dimmer","type":"slider","topic":"home/dim",
             "config":{"min":100,"max":0}},
            {"id":"3","name":"Fan","type":"slider","topic":"home/fan",
             "config":{"step":0}},
            {"id":"4","name":"All","type":"read","topic":"home/+/temp"},
            {"id":"5","name":"Blank","type":"read","topic":" "}
        ]"#;

        let devices: Vec<Device> = serde_json::from_str(json).unwrap();

        assert!(devices[0].validate().is_ok());
        for device in &devices[1..] {
            let err = device.validate().unwrap_err().to_string();
            assert!(err.contains(&format!("'{}'", device.id)), "{}", err);
        }
    }

    #[test]
    fn initial_values_follow_type() {
        assert_eq!(
            DeviceKind::default().initial_value(),
            Some(DeviceValue::Bool(false))
        );
        assert_eq!(
            DeviceKind::Slider(SliderConfig {
                min: 16.0,
                max: 30.0,
                ..Default::default()
            })
            .initial_value(),
            Some(DeviceValue::Number(16.0))
        );
        assert_eq!(DeviceKind::Read(ReadConfig::default()).initial_value(), None);
    }

    #[test]
    fn parses_types_and_icons_case_insensitively() {
        assert_eq!("Slider".parse::<DeviceType>().unwrap(), DeviceType::Slider);
        assert_eq!("TV".parse::<Icon>().unwrap(), Icon::Tv);
        assert!("toaster".parse::<Icon>().is_err());
    }
}
