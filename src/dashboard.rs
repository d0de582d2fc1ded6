use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use color_eyre::Result;
use eyre::eyre;
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::{
    broker::{find_preset, BrokerSettings, WsProtocol},
    mqtt::{
        catalog::{DeviceCatalog, DeviceEdit},
        connection::{ConnectRequest, ConnectionManager, ConnectionState},
        debounce::DebounceGuard,
        device::{Device, DeviceKind, DeviceValue, NewDevice},
        events::{ConnectionEvent, RequestId, TransportCommand, TransportEvent, TransportOp},
        publisher::{plan_command, LocalUpdate},
        subscriptions::SubscriptionTracker,
    },
    notify::Notification,
    storage::{Storage, StorageKey},
};

/// Something the dashboard wants done outside of itself.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Replace the current broker connection.
    Connect(ConnectRequest),
    /// Hand a command to the current connection.
    Send(TransportCommand),
    Notify(Notification),
}

#[derive(Clone, Debug, PartialEq)]
enum PendingRequest {
    Publish {
        topic: String,
        local_update: LocalUpdate,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
}

/// Device state and broker synchronization.
///
/// The dashboard never does I/O towards the broker itself. User actions and
/// transport events go in, [`Effect`]s come out through
/// [`drain_effects`](Self::drain_effects). Catalog, settings and the dark-mode
/// flag are written to storage as part of each change.
#[derive(Debug)]
pub struct Dashboard {
    catalog: DeviceCatalog,
    storage: Storage,
    broker: BrokerSettings,
    dark_mode: bool,
    connection: ConnectionManager,
    subscriptions: SubscriptionTracker,
    debounce: DebounceGuard,
    pending: HashMap<RequestId, PendingRequest>,
    next_request: RequestId,
    effects: VecDeque<Effect>,
}

impl Dashboard {
    pub fn load(storage: Storage, debounce_window: Duration) -> Result<Self> {
        let catalog = DeviceCatalog::load(storage.clone())?;
        let broker: BrokerSettings = storage.load(StorageKey::Settings)?.unwrap_or_default();
        let dark_mode: bool = storage.load(StorageKey::DarkMode)?.unwrap_or(false);

        Ok(Dashboard {
            catalog,
            storage,
            broker,
            dark_mode,
            connection: ConnectionManager::default(),
            subscriptions: SubscriptionTracker::default(),
            debounce: DebounceGuard::new(debounce_window),
            pending: HashMap::new(),
            next_request: 1,
            effects: VecDeque::new(),
        })
    }

    /// Opens the first broker connection.
    pub fn start(&mut self) {
        self.reconnect();
    }

    pub fn devices(&self) -> &[Device] {
        self.catalog.devices()
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.catalog.get(id)
    }

    pub fn broker(&self) -> &BrokerSettings {
        &self.broker
    }

    pub fn dark_mode(&self) -> bool {
        self.dark_mode
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions.subscribed().map(str::to_string).collect()
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        self.effects.drain(..).collect()
    }

    pub fn add_device(&mut self, new: NewDevice) -> Option<Device> {
        let result = self.catalog.create(new);
        let device = self.report_storage(result);

        if let Some(device) = &device {
            self.notify(Notification::success(
                "Device added",
                format!("{} has been added to your dashboard.", device.name),
            ));
        }

        self.sync_subscriptions();
        device
    }

    pub fn update_device(&mut self, id: &str, new: NewDevice) -> Option<DeviceEdit> {
        let result = self.catalog.update(id, new);
        let edit = self.report_storage(result).flatten();

        match &edit {
            Some(edit) => {
                if edit.topic_changed() {
                    info!(
                        "Device {} moved from {} to {}",
                        id, edit.previous.topic, edit.current.topic
                    );
                }
                self.notify(Notification::success(
                    "Device updated",
                    format!("{} has been updated.", edit.current.name),
                ));
            }
            None => debug!("No edit applied to device {}", id),
        }

        self.sync_subscriptions();
        edit
    }

    pub fn remove_device(&mut self, id: &str) -> Option<Device> {
        let result = self.catalog.remove(id);
        let removed = self.report_storage(result).flatten();

        match &removed {
            Some(device) => {
                self.debounce.forget(id);
                self.notify(Notification::success(
                    "Device removed",
                    format!("{} has been removed from your dashboard.", device.name),
                ));
            }
            None => debug!("No device removed for id {}", id),
        }

        self.sync_subscriptions();
        removed
    }

    /// Sends a user-initiated value to the device's topic.
    ///
    /// Unknown ids and read-only devices are ignored.
    pub fn change_value(&mut self, id: &str, value: DeviceValue) {
        let Some(device) = self.catalog.get(id) else {
            debug!("Ignoring value change for unknown device {}", id);
            return;
        };

        let Some(command) = plan_command(device, &value) else {
            debug!("Device {} ({}) does not accept commands", id, device.name);
            return;
        };

        if let LocalUpdate::Optimistic(local) = &command.local_update {
            let result = self.catalog.set_value(id, local.clone());
            self.report_storage(result);
        }

        if !self.connection.has_connection() {
            self.notify(Notification::error("Error", "MQTT client not connected"));
            return;
        }

        info!("Publishing {} to {}", command.payload, command.topic);

        self.send(
            TransportOp::Publish {
                topic: command.topic.clone(),
                payload: command.payload,
            },
            PendingRequest::Publish {
                topic: command.topic,
                local_update: command.local_update,
            },
        );
    }

    /// Sets a switch to `on`, unless the same switch was toggled less than
    /// the debounce window ago.
    pub fn set_switch(&mut self, id: &str, on: bool) {
        self.set_switch_at(id, on, Instant::now())
    }

    pub fn set_switch_at(&mut self, id: &str, on: bool, now: Instant) {
        match self.catalog.get(id).map(|device| &device.kind) {
            Some(DeviceKind::Switch(_)) => {}
            Some(_) => {
                warn!("Device {} is not a switch", id);
                return;
            }
            None => {
                debug!("Ignoring toggle of unknown device {}", id);
                return;
            }
        }

        if !self.debounce.try_acquire(id, now) {
            debug!("Dropping toggle of device {} inside the debounce window", id);
            return;
        }

        self.change_value(id, DeviceValue::Bool(on));
    }

    pub fn toggle_switch(&mut self, id: &str) {
        self.toggle_switch_at(id, Instant::now())
    }

    pub fn toggle_switch_at(&mut self, id: &str, now: Instant) {
        let on = self
            .catalog
            .get(id)
            .and_then(|device| device.value.as_ref())
            .is_some_and(DeviceValue::is_truthy);

        self.set_switch_at(id, !on, now)
    }

    /// Sends a slider position, clamped to the slider's range.
    pub fn set_slider(&mut self, id: &str, value: f64) {
        let value = match self.catalog.get(id).map(|device| &device.kind) {
            Some(DeviceKind::Slider(config)) => value.max(config.min).min(config.max),
            Some(_) => {
                warn!("Device {} is not a slider", id);
                return;
            }
            None => {
                debug!("Ignoring value change for unknown device {}", id);
                return;
            }
        };

        self.change_value(id, DeviceValue::Number(value))
    }

    pub fn press_button(&mut self, id: &str) {
        self.change_value(id, DeviceValue::Bool(true))
    }

    /// Stores new broker settings, reconnecting if the URL or credentials
    /// changed.
    pub fn set_broker_settings(&mut self, settings: BrokerSettings) {
        self.broker = settings;

        let result = self.storage.save(StorageKey::Settings, &self.broker);
        self.report_storage(result);

        self.reconnect();
    }

    pub fn select_preset(&mut self, name: &str) -> bool {
        let Some(preset) = find_preset(name) else {
            self.notify(Notification::error(
                "Unknown preset",
                format!("No broker preset named {}", name),
            ));
            return false;
        };

        let mut settings = self.broker.clone();
        settings.select_preset(preset);
        self.set_broker_settings(settings);

        true
    }

    pub fn use_custom_broker(&mut self, protocol: WsProtocol, host: &str, port: &str, path: &str) {
        let mut settings = self.broker.clone();
        settings.use_custom(protocol, host, port, path);
        self.set_broker_settings(settings);
    }

    pub fn set_credentials(&mut self, username: &str, password: &str) {
        let settings = BrokerSettings {
            mqtt_username: username.to_string(),
            mqtt_password: password.to_string(),
            ..self.broker.clone()
        };
        self.set_broker_settings(settings);
    }

    pub fn set_dark_mode(&mut self, enabled: bool) {
        self.dark_mode = enabled;

        let result = self.storage.save(StorageKey::DarkMode, &enabled);
        if self.report_storage(result).is_some() {
            let theme = if enabled { "dark" } else { "light" };
            self.notify(Notification::info("Theme", format!("Switched to the {} theme", theme)));
        }
    }

    pub fn export_devices(&self) -> Result<String> {
        self.catalog.export_json()
    }

    /// Replaces the whole catalog with devices in the persisted JSON format.
    pub fn import_devices(&mut self, json: &str) -> bool {
        let result = parse_devices(json).and_then(|devices| {
            let count = devices.len();
            self.catalog.replace_all(devices).map(|_| count)
        });

        let imported = match result {
            Ok(count) => {
                self.debounce.clear();
                self.notify(Notification::success(
                    "Devices imported",
                    format!("Imported {} devices.", count),
                ));
                true
            }
            Err(e) => {
                self.notify(Notification::error("Import Error", format!("{:#}", e)));
                false
            }
        };

        self.sync_subscriptions();
        imported
    }

    pub fn handle_transport(&mut self, event: ConnectionEvent) {
        if !self.connection.is_current(event.generation) {
            debug!(
                "Dropping event from replaced connection #{}: {:?}",
                event.generation, event.event
            );
            return;
        }

        match event.event {
            TransportEvent::Connected => self.connected(),
            TransportEvent::Error(e) => {
                warn!("MQTT connection error: {}", e);

                if self.connection.set_state(ConnectionState::Failed) != ConnectionState::Failed {
                    self.notify(Notification::error(
                        "Connection Error",
                        "Failed to connect to MQTT broker",
                    ));
                }
            }
            TransportEvent::Message { topic, payload } => {
                debug!(
                    "Received message on {}: {}",
                    topic,
                    String::from_utf8_lossy(&payload)
                );

                let result = self.catalog.apply_message(&topic, &payload);
                self.report_storage(result);
            }
            TransportEvent::Completed { id, result } => self.complete(id, result),
        }
    }

    /// Completes a request the transport could not even attempt.
    pub fn fail_request(&mut self, id: RequestId, error: impl Into<String>) {
        self.complete(id, Err(error.into()))
    }

    fn connected(&mut self) {
        if self.connection.set_state(ConnectionState::Connected) != ConnectionState::Connected {
            self.notify(Notification::success(
                "Connected",
                "Successfully connected to MQTT broker",
            ));
        }

        // A fresh session has no subscriptions
        self.pending
            .retain(|_, request| matches!(request, PendingRequest::Publish { .. }));
        self.subscriptions.reset();

        self.sync_subscriptions();
    }

    fn complete(&mut self, id: RequestId, result: Result<(), String>) {
        let Some(request) = self.pending.remove(&id) else {
            debug!("Ignoring completion of unknown request {}", id);
            return;
        };

        match (request, result) {
            (PendingRequest::Publish { topic, local_update }, Ok(())) => {
                debug!("Published to {}", topic);

                if let LocalUpdate::OnConfirm { on } = local_update {
                    let result = self.catalog.set_switch_state_on_topic(&topic, on);
                    self.report_storage(result);
                }
            }
            (PendingRequest::Publish { topic, .. }, Err(e)) => {
                warn!("Publishing to {} failed: {}", topic, e);
                self.notify(Notification::error(
                    "Publish Error",
                    format!("Failed to publish to {}", topic),
                ));
            }
            (PendingRequest::Subscribe { topic }, Ok(())) => {
                self.subscriptions.subscribe_finished(&topic, true);
                info!("Subscribed to {}", topic);
                self.notify(Notification::success("Success", format!("Subscribed to {}", topic)));

                // The topic may have been dropped from the catalog meanwhile
                let wanted = self.catalog.subscription_topics();
                for topic in self.subscriptions.plan_unsubscribes(&wanted) {
                    self.send_unsubscribe(topic);
                }
            }
            (PendingRequest::Subscribe { topic }, Err(e)) => {
                self.subscriptions.subscribe_finished(&topic, false);
                warn!("Subscribing to {} failed: {}", topic, e);
                self.notify(Notification::error(
                    "Subscribe Error",
                    "Failed to subscribe to topic",
                ));
            }
            (PendingRequest::Unsubscribe { topic }, Ok(())) => {
                self.subscriptions.unsubscribe_finished(&topic, true);
                info!("Unsubscribed from {}", topic);

                // The topic may be wanted again by now
                self.sync_subscriptions();
            }
            (PendingRequest::Unsubscribe { topic }, Err(e)) => {
                self.subscriptions.unsubscribe_finished(&topic, false);
                warn!("Unsubscribing from {} failed: {}", topic, e);
                self.notify(Notification::error(
                    "Unsubscribe Error",
                    format!("Failed to unsubscribe from {}", topic),
                ));
            }
        }
    }

    fn reconnect(&mut self) {
        let Some(request) = self.connection.apply(&self.broker) else {
            return;
        };

        // Whatever was in flight belongs to the old connection
        self.pending.clear();
        self.subscriptions.reset();

        self.effects.push_back(Effect::Connect(request));
    }

    fn sync_subscriptions(&mut self) {
        if !self.connection.is_ready() {
            return;
        }

        let wanted = self.catalog.subscription_topics();
        let plan = self.subscriptions.plan(&wanted);
        if plan.is_empty() {
            return;
        }

        debug!(
            "Subscribing to {:?}, unsubscribing from {:?}",
            plan.subscribe, plan.unsubscribe
        );

        for topic in plan.subscribe {
            self.send(
                TransportOp::Subscribe {
                    topic: topic.clone(),
                },
                PendingRequest::Subscribe { topic },
            );
        }

        for topic in plan.unsubscribe {
            self.send_unsubscribe(topic);
        }
    }

    fn send_unsubscribe(&mut self, topic: String) {
        self.send(
            TransportOp::Unsubscribe {
                topic: topic.clone(),
            },
            PendingRequest::Unsubscribe { topic },
        );
    }

    fn send(&mut self, op: TransportOp, request: PendingRequest) {
        let id = self.next_request;
        self.next_request += 1;

        self.pending.insert(id, request);
        self.effects
            .push_back(Effect::Send(TransportCommand { id, op }));
    }

    fn notify(&mut self, notification: Notification) {
        self.effects.push_back(Effect::Notify(notification));
    }

    fn report_storage<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.notify(Notification::error("Storage Error", format!("{:#}", e)));
                None
            }
        }
    }
}

fn parse_devices(json: &str) -> Result<Vec<Device>> {
    let de = &mut serde_json::Deserializer::from_str(json);
    serde_path_to_error::deserialize(de)
        .map_err(|e| eyre!("Invalid device list at {}: {}", e.path(), e.inner()))
}
