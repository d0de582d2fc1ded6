use color_eyre::Result;
use log::{debug, info};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::{
    console::{dispatch, start_console_loop},
    dashboard::{Dashboard, Effect},
    mqtt::events::{ConnectionEvent, TransportEvent},
    protocols::mqtt::MqttConnection,
    settings::Settings,
    storage::Storage,
};

/// Runs the dashboard until `quit` or Ctrl-C.
pub async fn run(settings: Settings) -> Result<()> {
    let storage = Storage::open(&settings.storage_dir)?;
    let mut dashboard = Dashboard::load(storage, settings.debounce())?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (actions_tx, mut actions_rx) = mpsc::unbounded_channel();
    start_console_loop(actions_tx);

    let mut connection = None;

    dashboard.start();
    apply_effects(&mut dashboard, &mut connection, &settings, &events_tx).await;

    info!(
        "Loaded {} devices from {}, type 'help' for commands",
        dashboard.devices().len(),
        settings.storage_dir
    );

    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => dashboard.handle_transport(event),
            Some(action) = actions_rx.recv() => {
                if dispatch(&mut dashboard, action).is_break() {
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }

        apply_effects(&mut dashboard, &mut connection, &settings, &events_tx).await;
    }

    info!("Shutting down");

    if let Some(connection) = connection.take() {
        connection.close().await;
    }

    Ok(())
}

/// Carries out everything the dashboard asked for, including effects that
/// result from carrying out effects.
async fn apply_effects(
    dashboard: &mut Dashboard,
    connection: &mut Option<MqttConnection>,
    settings: &Settings,
    events_tx: &UnboundedSender<ConnectionEvent>,
) {
    loop {
        let effects = dashboard.drain_effects();
        if effects.is_empty() {
            return;
        }

        for effect in effects {
            match effect {
                Effect::Connect(request) => {
                    if let Some(previous) = connection.take() {
                        debug!("Closing MQTT connection #{}", previous.generation());
                        previous.close().await;
                    }

                    match MqttConnection::connect(&request, settings, events_tx.clone()) {
                        Ok(new_connection) => *connection = Some(new_connection),
                        Err(e) => dashboard.handle_transport(ConnectionEvent {
                            generation: request.generation,
                            event: TransportEvent::Error(format!("{:#}", e)),
                        }),
                    }
                }
                Effect::Send(command) => {
                    let id = command.id;

                    match connection.as_ref() {
                        Some(connection) => {
                            if let Err(e) = connection.execute(command).await {
                                dashboard.fail_request(id, format!("{:#}", e));
                            }
                        }
                        None => dashboard.fail_request(id, "MQTT client not connected"),
                    }
                }
                Effect::Notify(notification) => notification.log(),
            }
        }
    }
}
