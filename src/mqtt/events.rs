/// Correlates a transport command with its completion.
pub type RequestId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportOp {
    Publish { topic: String, payload: String },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
}

impl TransportOp {
    pub fn topic(&self) -> &str {
        match self {
            TransportOp::Publish { topic, .. }
            | TransportOp::Subscribe { topic }
            | TransportOp::Unsubscribe { topic } => topic,
        }
    }
}

/// Fire-and-forget request for the transport; its outcome arrives later as a
/// [`TransportEvent::Completed`] with the same id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportCommand {
    pub id: RequestId,
    pub op: TransportOp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Error(String),
    Message { topic: String, payload: Vec<u8> },
    Completed { id: RequestId, result: Result<(), String> },
}

/// A transport event tagged with the connection generation it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub generation: u64,
    pub event: TransportEvent,
}
