//! Connection state machine
//!
//! [`Session`] owns the connection state, message id counter and inflight
//! tracker for a single broker connection. It performs no IO: the event
//! loop feeds it [`ConnectionEvent`]s and executes the [`Action`]s it
//! queues in response.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use super::inflight::InflightTracker;
use crate::config::OutputConfig;
use crate::protocol::{ConnAck, Connect, Packet, PubAck, Publish, QoS};

/// Keep alive interval advertised in CONNECT, in seconds
pub const KEEP_ALIVE_SECS: u16 = 60;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

/// Notifications delivered to the state machine
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Transport connect succeeded
    TransportConnected,
    /// Transport connect failed
    ConnectFailed { kind: io::ErrorKind, reason: String },
    /// A packet arrived from the broker
    Packet(Packet),
    /// The transport closed
    Closed,
    /// Retransmission timer fired
    Tick,
    /// Keep alive timer fired
    KeepAlive,
}

/// Work the event loop must carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a new transport connection
    Connect,
    /// Write a packet on the current connection
    Send(Packet),
    /// Close the current connection
    Close,
}

/// Outcome of the most recent connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectOutcome {
    Success,
    Failed(io::ErrorKind),
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: u16,
    pub qos: QoS,
    pub retain: bool,
}

impl SessionConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: KEEP_ALIVE_SECS,
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    /// Connection parameters for a parsed output parameter string
    pub fn from_output(output: &OutputConfig, client_id: impl Into<String>) -> Self {
        Self {
            username: output.username.clone(),
            password: output.password.clone(),
            qos: output.qos,
            retain: output.retain,
            ..Self::new(client_id)
        }
    }

    fn connect_packet(&self) -> Packet {
        Packet::Connect(Box::new(Connect {
            client_id: self.client_id.clone(),
            clean_session: true,
            keep_alive: self.keep_alive,
            username: self.username.clone(),
            password: self.password.as_ref().map(|p| Bytes::from(p.clone())),
        }))
    }
}

/// Sans-IO MQTT publishing session
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: ConnectionState,
    inflight: InflightTracker,
    next_message_id: u16,
    last_connect: Option<ConnectOutcome>,
    actions: VecDeque<Action>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_tracker(config, InflightTracker::new())
    }

    pub fn with_tracker(config: SessionConfig, inflight: InflightTracker) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            inflight,
            next_message_id: 0,
            last_connect: None,
            actions: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn inflight(&self) -> &InflightTracker {
        &self.inflight
    }

    /// Next queued action, in order
    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// Begin the first connection attempt
    pub fn start(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.reconnect();
        }
    }

    /// Feed one event through the state machine
    pub fn handle(&mut self, event: ConnectionEvent, now: Instant) {
        if self.state == ConnectionState::ShuttingDown {
            trace!("Ignoring {:?} while shutting down", event);
            return;
        }

        match event {
            ConnectionEvent::TransportConnected => self.on_connected(),
            ConnectionEvent::ConnectFailed { kind, reason } => {
                if self.last_connect != Some(ConnectOutcome::Failed(kind)) {
                    error!("MQTT connect error: {}", reason);
                }
                self.last_connect = Some(ConnectOutcome::Failed(kind));
                self.on_closed();
            }
            ConnectionEvent::Packet(packet) => self.on_packet(packet),
            ConnectionEvent::Closed => self.on_closed(),
            ConnectionEvent::Tick => self.on_tick(now),
            ConnectionEvent::KeepAlive => {
                if self.state == ConnectionState::Connected {
                    self.actions.push_back(Action::Send(Packet::PingReq));
                }
            }
        }
    }

    /// Publish a payload, returning the message id it was assigned
    ///
    /// QoS 1/2 messages are tracked even when no connection is up; the
    /// retransmission sweep delivers them once one is. A message the
    /// tracker refuses is dropped without being sent.
    pub fn publish(&mut self, topic: &str, payload: &[u8], now: Instant) -> u16 {
        let message_id = self.next_message_id();
        let qos = self.config.qos;
        let topic: Arc<str> = Arc::from(topic);
        let payload = Bytes::copy_from_slice(payload);

        if qos.requires_ack() {
            let tracked = self
                .inflight
                .add(topic.clone(), message_id, payload.clone(), now);
            if !tracked {
                warn!("Dropping publish {} to {}: cannot track it", message_id, topic);
                return message_id;
            }
        }

        debug!(
            "Publishing {} ({} inflight): {}",
            message_id,
            self.inflight.len(),
            topic
        );

        if self.state == ConnectionState::Connected {
            self.actions.push_back(Action::Send(Packet::Publish(Publish {
                dup: false,
                qos,
                retain: self.config.retain,
                topic,
                packet_id: qos.requires_ack().then_some(message_id),
                payload,
            })));
        }

        message_id
    }

    /// Detach from the connection and release all tracked messages
    pub fn shutdown(&mut self) {
        if self.state == ConnectionState::ShuttingDown {
            return;
        }
        if self.state == ConnectionState::Connected {
            self.actions.push_back(Action::Send(Packet::Disconnect));
        }
        self.actions.push_back(Action::Close);
        self.inflight.clear();
        self.state = ConnectionState::ShuttingDown;
    }

    /// Increment and wrap, skipping 0 which is not a valid packet id
    fn next_message_id(&mut self) -> u16 {
        self.next_message_id = self.next_message_id.wrapping_add(1);
        if self.next_message_id == 0 {
            self.next_message_id = 1;
        }
        self.next_message_id
    }

    fn reconnect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.actions.push_back(Action::Connect);
    }

    fn on_connected(&mut self) {
        debug!("MQTT transport connected, sending CONNECT");
        self.last_connect = Some(ConnectOutcome::Success);
        self.state = ConnectionState::Connected;
        self.actions
            .push_back(Action::Send(self.config.connect_packet()));
    }

    fn on_closed(&mut self) {
        if self.state == ConnectionState::Connected
            && self.last_connect == Some(ConnectOutcome::Success)
        {
            warn!("MQTT connection failed, reconnecting");
        }

        // Writes queued for the dead connection are dropped; tracked
        // messages are resent by the sweep after reconnecting.
        self.actions.retain(|a| !matches!(a, Action::Send(_)));
        self.state = ConnectionState::Disconnected;
        self.reconnect();
    }

    fn on_tick(&mut self, now: Instant) {
        if self.state != ConnectionState::Connected {
            return;
        }

        let Self {
            config,
            inflight,
            actions,
            ..
        } = self;
        inflight.sweep(now, |message| {
            info!("Resending ({}): {}", message.retries, message.message_id);
            actions.push_back(Action::Send(Packet::Publish(Publish {
                dup: true,
                qos: config.qos,
                retain: config.retain,
                topic: message.topic.clone(),
                packet_id: Some(message.message_id),
                payload: message.payload.clone(),
            })));
        });
    }

    fn on_packet(&mut self, packet: Packet) {
        match packet {
            Packet::ConnAck(ConnAck { return_code, .. }) => {
                if return_code.is_accepted() {
                    info!("MQTT connection established");
                } else {
                    error!("MQTT connection error: {}", return_code);
                }
            }
            Packet::PubAck(PubAck { packet_id }) => {
                if self.inflight.remove(packet_id) {
                    debug!(
                        "Acknowledge {} ({} inflight)",
                        packet_id,
                        self.inflight.len()
                    );
                } else {
                    warn!("Unknown MQTT message id {} acknowledged", packet_id);
                }
            }
            Packet::PubRec(p) => debug!("MQTT PUBREC {}", p.packet_id),
            Packet::PubRel(p) => debug!("MQTT PUBREL {}", p.packet_id),
            Packet::PubComp(p) => debug!("MQTT PUBCOMP {}", p.packet_id),
            Packet::SubAck(p) => debug!("MQTT SUBACK {}", p.packet_id),
            Packet::Publish(publish) => {
                info!(
                    "MQTT incoming message {}: {}",
                    publish.topic,
                    String::from_utf8_lossy(&publish.payload)
                );
                if publish.qos == QoS::AtLeastOnce {
                    if let Some(packet_id) = publish.packet_id {
                        self.actions
                            .push_back(Action::Send(Packet::PubAck(PubAck::new(packet_id))));
                    }
                }
            }
            Packet::PingResp => trace!("MQTT PINGRESP"),
            other => warn!("Unexpected {} from broker", other.name()),
        }
    }
}

/// Adapter publishing into a [`Session`] at a fixed instant
pub struct SessionPublisher<'a> {
    pub session: &'a mut Session,
    pub now: Instant,
}

impl crate::dispatch::Publisher for SessionPublisher<'_> {
    fn publish(&mut self, topic: &str, payload: &[u8]) {
        self.session.publish(topic, payload, self.now);
    }
}
