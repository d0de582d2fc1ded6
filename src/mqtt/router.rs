use log::debug;

use super::{codec::decode_inbound, device::Device};

/// Merges an inbound message into every device listening on `topic`.
///
/// Each matching device decodes the payload on its own; devices on other
/// topics are left untouched and the order of the slice never changes.
/// Returns the number of devices whose value actually changed.
pub fn route_message(devices: &mut [Device], topic: &str, payload: &[u8]) -> usize {
    let mut changed = 0;

    for device in devices.iter_mut().filter(|device| device.topic == topic) {
        let Some(value) = decode_inbound(&device.kind, payload) else {
            continue;
        };

        if device.value.as_ref() != Some(&value) {
            debug!(
                "Device {} ({}) on {} is now {}",
                device.id, device.name, topic, value
            );
            device.value = Some(value);
            changed += 1;
        }
    }

    changed
}
