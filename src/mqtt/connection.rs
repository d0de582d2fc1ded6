use std::fmt;

use log::{info, warn};

use crate::broker::BrokerSettings;

/// Identity of a broker connection. Only these three fields decide whether a
/// settings change requires a new connection.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionKey {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionKey")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Instruction for the transport driver to drop whatever connection it holds
/// and open a new one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRequest {
    pub generation: u64,
    pub key: ConnectionKey,
    pub client_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Keeps track of the one live connection and its generation.
///
/// Every connection gets a new generation number; transport events carry the
/// generation they belong to so that anything still in flight from a replaced
/// connection can be recognised and dropped.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    current: Option<ConnectionKey>,
    generation: u64,
    state: ConnectionState,
}

impl ConnectionManager {
    /// Returns a connect request if `settings` identify a different broker
    /// connection than the current one.
    pub fn apply(&mut self, settings: &BrokerSettings) -> Option<ConnectRequest> {
        let key = settings.connection_key();

        if key.url.trim().is_empty() {
            warn!("Broker URL is empty, keeping the current connection");
            return None;
        }

        if self.current.as_ref() == Some(&key) {
            return None;
        }

        self.generation += 1;
        self.current = Some(key.clone());
        self.state = ConnectionState::Connecting;

        let request = ConnectRequest {
            generation: self.generation,
            key,
            client_id: new_client_id(),
        };

        info!(
            "Connecting to {} as {} (connection #{})",
            request.key.url, request.client_id, request.generation
        );

        Some(request)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current.is_some() && generation == self.generation
    }

    pub fn has_connection(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Records a state change and returns the previous state.
    pub fn set_state(&mut self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut self.state, state)
    }
}

pub fn new_client_id() -> String {
    format!("dashboard_{:x}", rand::random::<u64>())
}
