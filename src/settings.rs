use std::time::Duration;

use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct MqttSettings {
    pub keep_alive_secs: u64,
    pub request_capacity: usize,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Settings {
    pub storage_dir: String,
    pub debounce_ms: u64,
    pub mqtt: MqttSettings,
}

impl Settings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        // rumqttc rejects keep-alives below one second
        Duration::from_secs(self.mqtt.keep_alive_secs.max(1))
    }
}

pub fn read_settings() -> Result<Settings, config::ConfigError> {
    config::Config::builder()
        .set_default("storage_dir", "data")?
        .set_default("debounce_ms", 1000)?
        .set_default("mqtt.keep_alive_secs", 5)?
        .set_default("mqtt.request_capacity", 10)?
        .add_source(config::File::with_name("Settings").required(false))
        .add_source(
            config::Environment::with_prefix("MQTT_DASH")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_settings_file() {
        let settings = read_settings().unwrap();

        assert_eq!(settings.storage_dir, "data");
        assert_eq!(settings.debounce(), Duration::from_millis(1000));
        assert_eq!(settings.keep_alive(), Duration::from_secs(5));
        assert_eq!(settings.mqtt.request_capacity, 10);
    }
}
