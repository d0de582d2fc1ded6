use super::{
    codec::encode_command,
    device::{Device, DeviceKind, DeviceValue, DEFAULT_OFF_MESSAGE, DEFAULT_ON_MESSAGE},
};

/// How the catalog reflects a command locally.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalUpdate {
    /// Nothing changes locally.
    None,
    /// Applied before the publish completes and never rolled back.
    Optimistic(DeviceValue),
    /// Applied to every switch on the topic once the publish is acknowledged.
    OnConfirm { on: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutboundCommand {
    pub topic: String,
    pub payload: String,
    pub local_update: LocalUpdate,
}

/// Translates a user-initiated value change into the message to publish.
///
/// Switches are confirm-gated, and only when the payload is literally `ON` or
/// `OFF`; custom on/off messages are published but not reflected locally until
/// the broker echoes them back. Sliders update optimistically. Buttons are a
/// pulse and ignore `value`. Read-only devices produce no command.
pub fn plan_command(device: &Device, value: &DeviceValue) -> Option<OutboundCommand> {
    let payload = encode_command(&device.kind, value)?;

    let local_update = match &device.kind {
        DeviceKind::Switch(_) => {
            if payload == DEFAULT_ON_MESSAGE {
                LocalUpdate::OnConfirm { on: true }
            } else if payload == DEFAULT_OFF_MESSAGE {
                LocalUpdate::OnConfirm { on: false }
            } else {
                LocalUpdate::None
            }
        }
        DeviceKind::Slider(_) => {
            LocalUpdate::Optimistic(DeviceValue::Number(value.as_number()?))
        }
        DeviceKind::Button(_) | DeviceKind::Read(_) => LocalUpdate::None,
    };

    Some(OutboundCommand {
        topic: device.topic.clone(),
        payload,
        local_update,
    })
}
