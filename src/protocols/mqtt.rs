use color_eyre::Result;
use eyre::eyre;
use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode, Transport,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc::UnboundedSender, Mutex},
    task::{self, JoinHandle},
};
use url::Url;

use crate::{
    mqtt::{
        connection::ConnectRequest,
        events::{ConnectionEvent, RequestId, TransportCommand, TransportEvent, TransportOp},
    },
    settings::Settings,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: Scheme,
    /// Hostname, or the full URL for websocket transports.
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    fn transport(&self) -> Transport {
        match self.scheme {
            Scheme::Tcp => Transport::Tcp,
            Scheme::Tls => Transport::tls_with_default_config(),
            Scheme::Ws => Transport::Ws,
            Scheme::Wss => Transport::wss_with_default_config(),
        }
    }
}

pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress> {
    let broker_url = broker_url.trim();
    let url = Url::parse(broker_url)?;

    let (scheme, default_port) = match url.scheme() {
        "mqtt" | "tcp" => (Scheme::Tcp, 1883),
        "mqtts" | "ssl" => (Scheme::Tls, 8883),
        "ws" => (Scheme::Ws, 80),
        "wss" => (Scheme::Wss, 443),
        other => return Err(eyre!("Unsupported broker URL scheme '{}'", other)),
    };

    let hostname = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| eyre!("Broker URL {} has no host", broker_url))?;
    let port = url.port().unwrap_or(default_port);

    let host = match scheme {
        Scheme::Ws | Scheme::Wss => broker_url.to_string(),
        Scheme::Tcp | Scheme::Tls => hostname.to_string(),
    };

    Ok(BrokerAddress { scheme, host, port })
}

#[derive(Debug, Default)]
struct AckQueue {
    waiting: VecDeque<RequestId>,
    bound: HashMap<u16, RequestId>,
}

impl AckQueue {
    fn bind(&mut self, pkid: u16) {
        // Retransmits reuse the packet id they were first sent with
        if self.bound.contains_key(&pkid) {
            return;
        }

        if let Some(id) = self.waiting.pop_front() {
            self.bound.insert(pkid, id);
        }
    }

    fn complete(&mut self, pkid: u16) -> Option<RequestId> {
        self.bound.remove(&pkid)
    }
}

/// Matches broker acknowledgements to the requests that caused them.
///
/// rumqttc sends requests in the order they were queued, so each packet kind
/// keeps a FIFO of request ids that get bound to packet ids as the packets
/// leave.
#[derive(Debug, Default)]
pub struct PendingAcks {
    publishes: AckQueue,
    subscribes: AckQueue,
    unsubscribes: AckQueue,
}

impl PendingAcks {
    fn queue(&mut self, op: &TransportOp) -> &mut AckQueue {
        match op {
            TransportOp::Publish { .. } => &mut self.publishes,
            TransportOp::Subscribe { .. } => &mut self.subscribes,
            TransportOp::Unsubscribe { .. } => &mut self.unsubscribes,
        }
    }

    pub fn push(&mut self, op: &TransportOp, id: RequestId) {
        self.queue(op).waiting.push_back(id);
    }

    /// Undoes the latest [`push`](Self::push) for a request that never made it
    /// into the client queue.
    pub fn pop(&mut self, op: &TransportOp) {
        self.queue(op).waiting.pop_back();
    }

    /// Subscriptions in flight are lost when a new session starts.
    fn session_restarted(&mut self) {
        self.subscribes.bound.clear();
        self.unsubscribes.bound.clear();
    }

    /// Turns a rumqttc event into the transport event the dashboard cares
    /// about, if any.
    pub fn translate(&mut self, event: &Event) -> Option<TransportEvent> {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                self.session_restarted();
                Some(TransportEvent::Connected)
            }
            Event::Incoming(Packet::Publish(publish)) => Some(TransportEvent::Message {
                topic: publish.topic.clone(),
                payload: publish.payload.to_vec(),
            }),
            Event::Incoming(Packet::PubAck(ack)) => {
                let id = self.publishes.complete(ack.pkid)?;
                Some(TransportEvent::Completed { id, result: Ok(()) })
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let id = self.subscribes.complete(ack.pkid)?;
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));

                let result = if rejected {
                    Err("Broker rejected the subscription".to_string())
                } else {
                    Ok(())
                };

                Some(TransportEvent::Completed { id, result })
            }
            Event::Incoming(Packet::UnsubAck(ack)) => {
                let id = self.unsubscribes.complete(ack.pkid)?;
                Some(TransportEvent::Completed { id, result: Ok(()) })
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                self.publishes.bind(*pkid);
                None
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                self.subscribes.bind(*pkid);
                None
            }
            Event::Outgoing(Outgoing::Unsubscribe(pkid)) => {
                self.unsubscribes.bind(*pkid);
                None
            }
            _ => None,
        }
    }
}

/// One broker connection: the rumqttc client plus the task polling its
/// event loop.
pub struct MqttConnection {
    generation: u64,
    client: AsyncClient,
    pending: Arc<Mutex<PendingAcks>>,
    task: JoinHandle<()>,
}

impl MqttConnection {
    pub fn connect(
        request: &ConnectRequest,
        settings: &Settings,
        tx: UnboundedSender<ConnectionEvent>,
    ) -> Result<MqttConnection> {
        let address = parse_broker_url(&request.key.url)?;

        let mut options = MqttOptions::new(
            request.client_id.clone(),
            address.host.clone(),
            address.port,
        );
        options.set_keep_alive(settings.keep_alive());
        options.set_transport(address.transport());
        if !request.key.username.is_empty() {
            options.set_credentials(request.key.username.clone(), request.key.password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, settings.mqtt.request_capacity);
        let pending = Arc::new(Mutex::new(PendingAcks::default()));
        let generation = request.generation;

        info!("Opening MQTT connection #{} to {}", generation, request.key.url);

        let task = {
            let pending = pending.clone();

            task::spawn(async move {
                loop {
                    let event = match eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                            debug!("MQTT connection #{} disconnected", generation);
                            break;
                        }
                        Ok(notification) => {
                            let mut pending = pending.lock().await;
                            match pending.translate(&notification) {
                                Some(event) => event,
                                None => continue,
                            }
                        }
                        Err(e) => {
                            let event = TransportEvent::Error(e.to_string());
                            if tx.send(ConnectionEvent { generation, event }).is_err() {
                                break;
                            }

                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    };

                    if tx.send(ConnectionEvent { generation, event }).is_err() {
                        break;
                    }
                }
            })
        };

        Ok(MqttConnection {
            generation,
            client,
            pending,
            task,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues a command without waiting for the broker. The outcome arrives
    /// later as a `Completed` event.
    pub async fn execute(&self, command: TransportCommand) -> Result<()> {
        let mut pending = self.pending.lock().await;
        pending.push(&command.op, command.id);

        let result = match &command.op {
            TransportOp::Publish { topic, payload } => self.client.try_publish(
                topic.as_str(),
                QoS::AtLeastOnce,
                false,
                payload.clone().into_bytes(),
            ),
            TransportOp::Subscribe { topic } => {
                self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce)
            }
            TransportOp::Unsubscribe { topic } => self.client.try_unsubscribe(topic.as_str()),
        };

        if let Err(e) = result {
            pending.pop(&command.op);
            return Err(eyre!("Could not queue request for {}: {}", command.op.topic(), e));
        }

        Ok(())
    }

    /// Sends DISCONNECT and waits briefly for the event loop to wind down
    /// before aborting it.
    pub async fn close(mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT connection #{} could not queue DISCONNECT: {}", self.generation, e);
        }

        if tokio::time::timeout(Duration::from_millis(500), &mut self.task)
            .await
            .is_err()
        {
            warn!("MQTT connection #{} did not close in time, aborting", self.generation);
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, Publish, SubAck, UnsubAck};

    fn publish_op() -> TransportOp {
        TransportOp::Publish {
            topic: "t".to_string(),
            payload: "ON".to_string(),
        }
    }

    fn subscribe_op() -> TransportOp {
        TransportOp::Subscribe {
            topic: "t".to_string(),
        }
    }

    #[test]
    fn parses_websocket_urls_as_full_hosts() {
        let address = parse_broker_url("wss://broker.emqx.io:8084/mqtt").unwrap();

        assert_eq!(address.scheme, Scheme::Wss);
        assert_eq!(address.host, "wss://broker.emqx.io:8084/mqtt");
        assert_eq!(address.port, 8084);

        assert_eq!(parse_broker_url("ws://localhost/mqtt").unwrap().port, 80);
    }

    #[test]
    fn parses_tcp_and_tls_urls() {
        assert_eq!(
            parse_broker_url("mqtt://localhost").unwrap(),
            BrokerAddress {
                scheme: Scheme::Tcp,
                host: "localhost".to_string(),
                port: 1883
            }
        );
        assert_eq!(parse_broker_url("mqtts://example.org").unwrap().port, 8883);
        assert_eq!(parse_broker_url("ssl://example.org:1234").unwrap().port, 1234);
    }

    #[test]
    fn rejects_unusable_urls() {
        assert!(parse_broker_url("http://example.org").is_err());
        assert!(parse_broker_url("broker.emqx.io").is_err());
        assert!(parse_broker_url("").is_err());
    }

    #[test]
    fn acks_complete_requests_in_queue_order() {
        let mut acks = PendingAcks::default();
        acks.push(&publish_op(), 1);
        acks.push(&publish_op(), 2);

        assert_eq!(acks.translate(&Event::Outgoing(Outgoing::Publish(10))), None);
        assert_eq!(acks.translate(&Event::Outgoing(Outgoing::Publish(11))), None);
        // retransmit of the first packet
        assert_eq!(acks.translate(&Event::Outgoing(Outgoing::Publish(10))), None);

        assert_eq!(
            acks.translate(&Event::Incoming(Packet::PubAck(PubAck { pkid: 11 }))),
            Some(TransportEvent::Completed { id: 2, result: Ok(()) })
        );
        assert_eq!(
            acks.translate(&Event::Incoming(Packet::PubAck(PubAck { pkid: 10 }))),
            Some(TransportEvent::Completed { id: 1, result: Ok(()) })
        );
        assert_eq!(
            acks.translate(&Event::Incoming(Packet::PubAck(PubAck { pkid: 10 }))),
            None
        );
    }

    #[test]
    fn rejected_subscriptions_fail() {
        let mut acks = PendingAcks::default();
        acks.push(&subscribe_op(), 7);
        acks.translate(&Event::Outgoing(Outgoing::Subscribe(1)));

        let suback = SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Failure],
        };

        assert!(matches!(
            acks.translate(&Event::Incoming(Packet::SubAck(suback))),
            Some(TransportEvent::Completed { id: 7, result: Err(_) })
        ));
    }

    #[test]
    fn new_session_forgets_subscriptions_in_flight() {
        let mut acks = PendingAcks::default();
        acks.push(&subscribe_op(), 3);
        acks.push(&TransportOp::Unsubscribe { topic: "u".to_string() }, 4);
        acks.translate(&Event::Outgoing(Outgoing::Subscribe(1)));
        acks.translate(&Event::Outgoing(Outgoing::Unsubscribe(2)));

        let connack = ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        };
        assert_eq!(
            acks.translate(&Event::Incoming(Packet::ConnAck(connack))),
            Some(TransportEvent::Connected)
        );

        let suback = SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtMostOnce)],
        };
        assert_eq!(acks.translate(&Event::Incoming(Packet::SubAck(suback))), None);
        assert_eq!(
            acks.translate(&Event::Incoming(Packet::UnsubAck(UnsubAck { pkid: 2 }))),
            None
        );
    }

    #[test]
    fn forwards_inbound_messages() {
        let mut acks = PendingAcks::default();
        let publish = Publish::new("home/temp", QoS::AtMostOnce, "21.5");

        assert_eq!(
            acks.translate(&Event::Incoming(Packet::Publish(publish))),
            Some(TransportEvent::Message {
                topic: "home/temp".to_string(),
                payload: b"21.5".to_vec()
            })
        );
    }

    #[test]
    fn unqueued_requests_are_withdrawn() {
        let mut acks = PendingAcks::default();
        acks.push(&publish_op(), 1);
        acks.push(&publish_op(), 2);
        acks.pop(&publish_op());

        acks.translate(&Event::Outgoing(Outgoing::Publish(5)));
        assert_eq!(
            acks.translate(&Event::Incoming(Packet::PubAck(PubAck { pkid: 5 }))),
            Some(TransportEvent::Completed { id: 1, result: Ok(()) })
        );
    }
}
