use std::collections::{BTreeSet, HashSet};

use color_eyre::Result;
use eyre::eyre;
use log::{debug, info};

use super::{
    device::{Device, DeviceKind, DeviceValue, NewDevice},
    router::route_message,
};
use crate::storage::{Storage, StorageKey};

/// Result of editing a device: the record before and after the edit.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceEdit {
    pub previous: Device,
    pub current: Device,
}

impl DeviceEdit {
    pub fn topic_changed(&self) -> bool {
        self.previous.topic != self.current.topic
    }
}

/// The persisted collection of devices.
///
/// Every mutation is written through to storage before returning. Device
/// creation, edits and removals are undone in memory when the write fails, so
/// the catalog never holds a device the caller was told was not added.
/// Value updates are kept and only the error is returned.
#[derive(Debug)]
pub struct DeviceCatalog {
    devices: Vec<Device>,
    storage: Storage,
}

impl DeviceCatalog {
    pub fn load(storage: Storage) -> Result<Self> {
        let devices: Vec<Device> = storage.load(StorageKey::Devices)?.unwrap_or_default();
        ensure_valid(&devices)?;

        info!("Loaded {} devices", devices.len());

        Ok(DeviceCatalog { devices, storage })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.id == id)
    }

    /// One past the largest numeric id. Once that would overflow, the
    /// smallest unused positive id is handed out instead.
    pub fn next_id(&self) -> String {
        let max = self
            .devices
            .iter()
            .filter_map(|device| device.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        match max.checked_add(1) {
            Some(id) => id.to_string(),
            None => (1..=u64::MAX)
                .map(|id| id.to_string())
                .find(|id| self.get(id).is_none())
                .unwrap_or_default(),
        }
    }

    pub fn create(&mut self, new: NewDevice) -> Result<Device> {
        let device = Device::from_new(self.next_id(), new);
        self.devices.push(device.clone());

        if let Err(e) = self.persist() {
            self.devices.pop();
            return Err(e);
        }

        Ok(device)
    }

    /// Replaces everything but the id. The value survives only if the type
    /// stays the same.
    pub fn update(&mut self, id: &str, new: NewDevice) -> Result<Option<DeviceEdit>> {
        let Some(device) = self.devices.iter_mut().find(|device| device.id == id) else {
            return Ok(None);
        };

        let previous = device.clone();
        let value = if previous.device_type() == new.kind.device_type() {
            previous.value.clone()
        } else {
            new.kind.initial_value()
        };

        *device = Device {
            value,
            ..Device::from_new(previous.id.clone(), new)
        };
        let current = device.clone();

        if let Err(e) = self.persist() {
            if let Some(device) = self.devices.iter_mut().find(|device| device.id == id) {
                *device = previous;
            }
            return Err(e);
        }

        Ok(Some(DeviceEdit { previous, current }))
    }

    pub fn remove(&mut self, id: &str) -> Result<Option<Device>> {
        let Some(index) = self.devices.iter().position(|device| device.id == id) else {
            return Ok(None);
        };

        let removed = self.devices.remove(index);

        if let Err(e) = self.persist() {
            self.devices.insert(index, removed);
            return Err(e);
        }

        Ok(Some(removed))
    }

    /// Returns whether the stored value changed.
    pub fn set_value(&mut self, id: &str, value: DeviceValue) -> Result<bool> {
        let Some(device) = self.devices.iter_mut().find(|device| device.id == id) else {
            return Ok(false);
        };

        if device.value.as_ref() == Some(&value) {
            return Ok(false);
        }

        device.value = Some(value);
        self.persist()?;

        Ok(true)
    }

    /// Sets every switch on `topic` to `on`. Returns how many changed.
    pub fn set_switch_state_on_topic(&mut self, topic: &str, on: bool) -> Result<usize> {
        let value = DeviceValue::Bool(on);
        let mut changed = 0;

        for device in self
            .devices
            .iter_mut()
            .filter(|device| device.topic == topic && matches!(device.kind, DeviceKind::Switch(_)))
        {
            if device.value.as_ref() != Some(&value) {
                device.value = Some(value.clone());
                changed += 1;
            }
        }

        if changed > 0 {
            self.persist()?;
        }

        Ok(changed)
    }

    /// Merges an inbound broker message. Storage is only touched when some
    /// value changed.
    pub fn apply_message(&mut self, topic: &str, payload: &[u8]) -> Result<usize> {
        let changed = route_message(&mut self.devices, topic, payload);

        if changed > 0 {
            self.persist()?;
        }

        Ok(changed)
    }

    /// Topics of every device that is updated from the broker.
    pub fn subscription_topics(&self) -> BTreeSet<String> {
        self.devices
            .iter()
            .filter(|device| device.kind.receives_updates())
            .map(|device| device.topic.clone())
            .collect()
    }

    pub fn replace_all(&mut self, devices: Vec<Device>) -> Result<()> {
        ensure_valid(&devices)?;

        let previous = std::mem::replace(&mut self.devices, devices);
        if let Err(e) = self.persist() {
            self.devices = previous;
            return Err(e);
        }

        Ok(())
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.devices)?)
    }

    pub fn persist(&self) -> Result<()> {
        debug!("Persisting {} devices", self.devices.len());
        self.storage.save(StorageKey::Devices, &self.devices)
    }
}

fn ensure_valid(devices: &[Device]) -> Result<()> {
    let mut seen = HashSet::new();

    for device in devices {
        device.validate()?;
        if !seen.insert(device.id.as_str()) {
            return Err(eyre!("Duplicate device id '{}'", device.id));
        }
    }

    Ok(())
}
