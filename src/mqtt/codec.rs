//! Payload encoding and decoding per device type.

use super::device::{DeviceKind, DeviceValue};

/// Decodes an inbound payload for a device of the given kind.
///
/// Returns `None` when the payload carries no state for this kind: switch
/// payloads that are neither the on nor the off message, and any payload for
/// sliders and buttons.
pub fn decode_inbound(kind: &DeviceKind, payload: &[u8]) -> Option<DeviceValue> {
    let text = String::from_utf8_lossy(payload);

    match kind {
        DeviceKind::Switch(config) => {
            if text == config.on_message {
                Some(DeviceValue::Bool(true))
            } else if text == config.off_message {
                Some(DeviceValue::Bool(false))
            } else {
                None
            }
        }
        DeviceKind::Read(_) => Some(match parse_number(&text) {
            Some(number) => DeviceValue::Number(number),
            None => DeviceValue::Text(text.into_owned()),
        }),
        DeviceKind::Slider(_) | DeviceKind::Button(_) => None,
    }
}

/// Encodes a user-requested value into the outbound payload for a device of
/// the given kind. Read-only devices cannot be commanded.
pub fn encode_command(kind: &DeviceKind, value: &DeviceValue) -> Option<String> {
    match kind {
        DeviceKind::Switch(config) => Some(if value.is_truthy() {
            config.on_message.clone()
        } else {
            config.off_message.clone()
        }),
        DeviceKind::Slider(_) => value.as_number().map(format_number),
        DeviceKind::Button(config) => Some(config.message.clone()),
        DeviceKind::Read(_) => None,
    }
}

/// Canonical string form of a number: `42`, `42.5`, `-0.25`. Negative zero
/// prints as `0`; magnitudes from `1e21` up and below `1e-6` use exponent
/// notation (`1e+21`, `1e-7`).
pub fn format_number(number: f64) -> String {
    if number == 0.0 {
        return "0".to_string();
    }

    let magnitude = number.abs();
    if magnitude >= 1e21 {
        format!("{:e}", number).replacen('e', "e+", 1)
    } else if magnitude < 1e-6 {
        format!("{:e}", number)
    } else {
        format!("{}", number)
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::device::{ButtonConfig, ReadConfig, SliderConfig, SwitchConfig};

    fn switch() -> DeviceKind {
        DeviceKind::Switch(SwitchConfig::default())
    }

    #[test]
    fn switch_decoding_is_strict() {
        assert_eq!(decode_inbound(&switch(), b"ON"), Some(DeviceValue::Bool(true)));
        assert_eq!(decode_inbound(&switch(), b"OFF"), Some(DeviceValue::Bool(false)));
        assert_eq!(decode_inbound(&switch(), b"MAYBE"), None);
        assert_eq!(decode_inbound(&switch(), b"on"), None);
        assert_eq!(decode_inbound(&switch(), b" ON"), None);
    }

    #[test]
    fn switch_decoding_uses_custom_messages() {
        let kind = DeviceKind::Switch(SwitchConfig {
            on_message: "1".to_string(),
            off_message: "0".to_string(),
        });

        assert_eq!(decode_inbound(&kind, b"1"), Some(DeviceValue::Bool(true)));
        assert_eq!(decode_inbound(&kind, b"0"), Some(DeviceValue::Bool(false)));
        assert_eq!(decode_inbound(&kind, b"ON"), None);
    }

    #[test]
    fn read_decoding_prefers_numbers() {
        let kind = DeviceKind::Read(ReadConfig::default());

        assert_eq!(decode_inbound(&kind, b"23.5"), Some(DeviceValue::Number(23.5)));
        assert_eq!(decode_inbound(&kind, b" -4 "), Some(DeviceValue::Number(-4.0)));
        assert_eq!(
            decode_inbound(&kind, b"sensor_ok"),
            Some(DeviceValue::Text("sensor_ok".to_string()))
        );
        assert_eq!(
            decode_inbound(&kind, b"NaN"),
            Some(DeviceValue::Text("NaN".to_string()))
        );
    }

    #[test]
    fn sliders_and_buttons_ignore_inbound_messages() {
        let slider = DeviceKind::Slider(SliderConfig::default());
        let button = DeviceKind::Button(ButtonConfig::default());

        assert_eq!(decode_inbound(&slider, b"50"), None);
        assert_eq!(decode_inbound(&button, b"PRESSED"), None);
    }

    #[test]
    fn encodes_commands_per_type() {
        let custom = DeviceKind::Switch(SwitchConfig {
            on_message: "ENCENDER".to_string(),
            off_message: "APAGAR".to_string(),
        });
        assert_eq!(
            encode_command(&custom, &DeviceValue::Bool(true)).as_deref(),
            Some("ENCENDER")
        );
        assert_eq!(
            encode_command(&custom, &DeviceValue::Bool(false)).as_deref(),
            Some("APAGAR")
        );

        let slider = DeviceKind::Slider(SliderConfig::default());
        assert_eq!(
            encode_command(&slider, &DeviceValue::Number(42.0)).as_deref(),
            Some("42")
        );
        assert_eq!(
            encode_command(&slider, &DeviceValue::Number(42.5)).as_deref(),
            Some("42.5")
        );

        let button = DeviceKind::Button(ButtonConfig::default());
        assert_eq!(
            encode_command(&button, &DeviceValue::Bool(false)).as_deref(),
            Some("PRESSED")
        );

        let read = DeviceKind::Read(ReadConfig::default());
        assert_eq!(encode_command(&read, &DeviceValue::Number(1.0)), None);
    }

    #[test]
    fn numbers_use_their_shortest_canonical_form() {
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-0.25), "-0.25");
        assert_eq!(format_number(1e20), "100000000000000000000");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(-2.5e22), "-2.5e+22");
        assert_eq!(format_number(1e-7), "1e-7");
    }
}
