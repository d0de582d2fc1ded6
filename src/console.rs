use std::{ops::ControlFlow, path::PathBuf};

use color_eyre::Result;
use eyre::eyre;
use log::debug;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
};

use crate::{
    broker::{WsProtocol, BROKER_PRESETS},
    dashboard::Dashboard,
    mqtt::{
        codec::format_number,
        device::{
            ButtonConfig, Device, DeviceKind, DeviceType, Icon, NewDevice, NewDeviceBuilder,
            ReadConfig, SliderConfig, SwitchConfig,
        },
    },
};

pub const HELP: &str = "\
Commands:
  list                                       show all devices
  add <type> <topic> <name...> [key=value]   add a device (switch, slider, button, read)
  edit <id> <type> <topic> <name...> [key=value]
                                             replace a device's settings
  remove <id>                                remove a device
  on <id> | off <id> | toggle <id>           switch a switch
  set <id> <value>                           move a slider
  press <id>                                 press a button
  presets                                    list broker presets
  preset <name>                              connect to a preset broker
  broker                                     show broker settings
  custom <ws|wss> <host> [port] [path]       connect to a custom broker
  login [username] [password]                set broker credentials
  theme <dark|light>                         set the theme
  export                                     print devices as JSON
  import <file>                              replace devices from a JSON file
  help                                       show this text
  quit                                       exit

Device options: icon, on, off (switch), min, max, step, unit (slider),
unit (read), message (button).";

#[derive(Clone, Debug, PartialEq)]
pub enum UserAction {
    List,
    Add(NewDevice),
    Edit { id: String, device: NewDevice },
    Remove(String),
    On(String),
    Off(String),
    Toggle(String),
    Set { id: String, value: f64 },
    Press(String),
    Presets,
    Preset(String),
    Broker,
    Custom {
        protocol: WsProtocol,
        host: String,
        port: String,
        path: String,
    },
    Login { username: String, password: String },
    Theme { dark: bool },
    Export,
    Import(String),
    Help,
    Quit,
}

/// A parsed console line. File imports are read by the console task, so the
/// dashboard only ever sees the file contents.
#[derive(Debug, PartialEq)]
enum ConsoleLine {
    Action(UserAction),
    ImportFile(PathBuf),
}

fn parse_line(line: &str) -> Result<Option<ConsoleLine>> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let action = match (command.to_ascii_lowercase().as_str(), &args[..]) {
        ("list" | "ls", []) => UserAction::List,
        ("add", [device_type, topic, rest @ ..]) => {
            UserAction::Add(parse_device(device_type, topic, rest)?)
        }
        ("edit", [id, device_type, topic, rest @ ..]) => UserAction::Edit {
            id: id.to_string(),
            device: parse_device(device_type, topic, rest)?,
        },
        ("remove" | "rm", [id]) => UserAction::Remove(id.to_string()),
        ("on", [id]) => UserAction::On(id.to_string()),
        ("off", [id]) => UserAction::Off(id.to_string()),
        ("toggle", [id]) => UserAction::Toggle(id.to_string()),
        ("set", [id, value]) => UserAction::Set {
            id: id.to_string(),
            value: parse_f64("value", value)?,
        },
        ("press", [id]) => UserAction::Press(id.to_string()),
        ("presets", []) => UserAction::Presets,
        ("preset", [name]) => UserAction::Preset(name.to_string()),
        ("broker", []) => UserAction::Broker,
        ("custom", [protocol, host, rest @ ..]) if rest.len() <= 2 => UserAction::Custom {
            protocol: protocol.parse()?,
            host: host.to_string(),
            port: rest.first().map(|port| port.to_string()).unwrap_or_default(),
            path: rest.get(1).map(|path| path.to_string()).unwrap_or_default(),
        },
        ("login", _) if args.len() <= 2 => UserAction::Login {
            username: args.first().map(|s| s.to_string()).unwrap_or_default(),
            password: args.get(1).map(|s| s.to_string()).unwrap_or_default(),
        },
        ("theme", [theme]) => match theme.to_ascii_lowercase().as_str() {
            "dark" => UserAction::Theme { dark: true },
            "light" => UserAction::Theme { dark: false },
            other => return Err(eyre!("Unknown theme '{}' (expected dark or light)", other)),
        },
        ("export", []) => UserAction::Export,
        ("import", [path]) => return Ok(Some(ConsoleLine::ImportFile(PathBuf::from(*path)))),
        ("help" | "?", []) => UserAction::Help,
        ("quit" | "exit", []) => UserAction::Quit,
        _ => return Err(eyre!("Could not understand '{}' (try 'help')", line.trim())),
    };

    Ok(Some(ConsoleLine::Action(action)))
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .ok_or_else(|| eyre!("Expected a number for {}, got '{}'", key, value))
}

fn parse_device(device_type: &str, topic: &str, rest: &[&str]) -> Result<NewDevice> {
    let device_type: DeviceType = device_type.parse()?;

    let (options, name): (Vec<&str>, Vec<&str>) = rest
        .iter()
        .copied()
        .partition(|word| word.contains('='));

    let mut builder = NewDeviceBuilder::default();
    builder.name(name.join(" ")).topic(topic);

    let mut kind = match device_type {
        DeviceType::Switch => DeviceKind::Switch(SwitchConfig::default()),
        DeviceType::Slider => DeviceKind::Slider(SliderConfig::default()),
        DeviceType::Button => DeviceKind::Button(ButtonConfig::default()),
        DeviceType::Read => DeviceKind::Read(ReadConfig::default()),
    };

    for option in options {
        let (key, value) = option.split_once('=').unwrap_or((option, ""));

        match (key, &mut kind) {
            ("icon", _) => {
                builder.icon(value.parse::<Icon>()?);
            }
            ("on", DeviceKind::Switch(config)) => config.on_message = value.to_string(),
            ("off", DeviceKind::Switch(config)) => config.off_message = value.to_string(),
            ("min", DeviceKind::Slider(config)) => config.min = parse_f64(key, value)?,
            ("max", DeviceKind::Slider(config)) => config.max = parse_f64(key, value)?,
            ("step", DeviceKind::Slider(config)) => config.step = parse_f64(key, value)?,
            ("unit", DeviceKind::Slider(SliderConfig { unit, .. }))
            | ("unit", DeviceKind::Read(ReadConfig { unit })) => unit_option(unit, value),
            ("message", DeviceKind::Button(config)) => config.message = value.to_string(),
            _ => {
                return Err(eyre!(
                    "Option '{}' does not apply to {} devices",
                    key,
                    device_type
                ))
            }
        }
    }

    builder.kind(kind);

    Ok(builder.build()?)
}

fn unit_option(unit: &mut Option<String>, value: &str) {
    *unit = Some(value.to_string()).filter(|unit| !unit.is_empty());
}

fn with_unit(value: String, unit: Option<&str>) -> String {
    match unit {
        Some(unit) => format!("{} {}", value, unit),
        None => value,
    }
}

pub fn render_device(device: &Device) -> String {
    let state = match &device.kind {
        DeviceKind::Switch(_) => {
            let on = device.value.as_ref().is_some_and(|value| value.is_truthy());
            let label = if on { "ON" } else { "OFF" };
            label.to_string()
        }
        DeviceKind::Slider(config) => {
            let value = device
                .value
                .as_ref()
                .and_then(|value| value.as_number())
                .unwrap_or(config.min);
            with_unit(
                format!(
                    "{} ({}..{})",
                    format_number(value),
                    format_number(config.min),
                    format_number(config.max)
                ),
                device.kind.unit(),
            )
        }
        DeviceKind::Button(config) => format!("sends {}", config.message),
        DeviceKind::Read(_) => match &device.value {
            Some(value) => with_unit(value.to_string(), device.kind.unit()),
            None => "-".to_string(),
        },
    };

    format!(
        "[{}] {} ({}, {}) {}: {}",
        device.id,
        device.name,
        device.device_type(),
        device.icon.as_str(),
        device.topic,
        state
    )
}

fn print_devices(dashboard: &Dashboard) {
    if dashboard.devices().is_empty() {
        println!("No devices yet, add one with 'add' (see 'help')");
        return;
    }

    for device in dashboard.devices() {
        println!("{}", render_device(device));
    }
}

fn print_broker(dashboard: &Dashboard) {
    let broker = dashboard.broker();

    let target = match broker.active_preset() {
        Some(preset) => format!("{} ({})", broker.broker_url(), preset.name),
        None => broker.broker_url(),
    };

    println!("Broker:     {}", target);
    println!("Mode:       {:?}", broker.mode);
    let username = if broker.mqtt_username.is_empty() {
        "-"
    } else {
        broker.mqtt_username.as_str()
    };

    println!("Username:   {}", username);
    println!("Connection: {:?}", dashboard.connection_state());
    println!("Subscribed: {}", dashboard.subscribed_topics().join(", "));
    println!("Theme:      {}", if dashboard.dark_mode() { "dark" } else { "light" });
}

/// Runs one console action against the dashboard.
pub fn dispatch(dashboard: &mut Dashboard, action: UserAction) -> ControlFlow<()> {
    match action {
        UserAction::List => print_devices(dashboard),
        UserAction::Add(device) => {
            if let Some(device) = dashboard.add_device(device) {
                println!("{}", render_device(&device));
            }
        }
        UserAction::Edit { id, device } => {
            if dashboard.update_device(&id, device).is_none() {
                println!("No device with id {}", id);
            }
        }
        UserAction::Remove(id) => {
            if dashboard.remove_device(&id).is_none() {
                println!("No device with id {}", id);
            }
        }
        UserAction::On(id) => dashboard.set_switch(&id, true),
        UserAction::Off(id) => dashboard.set_switch(&id, false),
        UserAction::Toggle(id) => dashboard.toggle_switch(&id),
        UserAction::Set { id, value } => dashboard.set_slider(&id, value),
        UserAction::Press(id) => dashboard.press_button(&id),
        UserAction::Presets => {
            for preset in BROKER_PRESETS.iter() {
                println!(
                    "{:<10} {:<36} {} (mqtt://{}:{})",
                    preset.name, preset.ws_url, preset.description, preset.url, preset.port
                );
            }
        }
        UserAction::Preset(name) => {
            dashboard.select_preset(&name);
        }
        UserAction::Broker => print_broker(dashboard),
        UserAction::Custom {
            protocol,
            host,
            port,
            path,
        } => dashboard.use_custom_broker(protocol, &host, &port, &path),
        UserAction::Login { username, password } => dashboard.set_credentials(&username, &password),
        UserAction::Theme { dark } => dashboard.set_dark_mode(dark),
        UserAction::Export => match dashboard.export_devices() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Export failed: {:#}", e),
        },
        UserAction::Import(json) => {
            dashboard.import_devices(&json);
        }
        UserAction::Help => println!("{}", HELP),
        UserAction::Quit => return ControlFlow::Break(()),
    }

    ControlFlow::Continue(())
}

/// Reads commands from stdin and forwards them to the control loop.
pub fn start_console_loop(tx: UnboundedSender<UserAction>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("stdin closed, console input stopped");
                    break;
                }
                Err(e) => {
                    eprintln!("Could not read from stdin: {:?}", e);
                    break;
                }
            };

            let action = match parse_line(&line) {
                Ok(Some(ConsoleLine::Action(action))) => action,
                Ok(Some(ConsoleLine::ImportFile(path))) => {
                    match tokio::fs::read_to_string(&path).await {
                        Ok(json) => UserAction::Import(json),
                        Err(e) => {
                            eprintln!("Could not read {}: {}", path.display(), e);
                            continue;
                        }
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("{}", e);
                    continue;
                }
            };

            if tx.send(action).is_err() {
                break;
            }
        }
    })
}
