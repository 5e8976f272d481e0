//! MQTT output task
//!
//! [`MqttOutput`] spawns one tokio task that owns the [`Session`], the
//! [`Dispatcher`] and the broker connection. Events are handed to the task
//! over an unbounded channel so publishing never waits on the network.

use std::fmt;
use std::future::{pending, Future};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::session::{
    Action, ConnectionEvent, ConnectionState, Session, SessionConfig, SessionPublisher,
};
use super::transport::{BoxedStream, Connector};
use crate::codec::{Decoder, Encoder};
use crate::config::{ConfigError, OutputConfig};
use crate::dispatch::Dispatcher;
use crate::event::Event;
use crate::protocol::Packet;

/// Period of the retransmission sweep
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 4096;

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<BoxedStream>> + Send>>;

/// Errors returned by [`MqttOutput`]
#[derive(Debug)]
pub enum ClientError {
    /// The output task has stopped
    Closed,
    /// The output task panicked
    Task(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Closed => write!(f, "MQTT output is closed"),
            ClientError::Task(msg) => write!(f, "MQTT output task failed: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

enum OutputCommand {
    Publish(Event),
    Shutdown,
}

/// Handle to a running MQTT output
pub struct MqttOutput {
    commands: mpsc::UnboundedSender<OutputCommand>,
    status: Arc<RwLock<ConnectionState>>,
    task: JoinHandle<()>,
}

impl MqttOutput {
    /// Start publishing to the broker described by `config`
    ///
    /// Must be called from within a tokio runtime. TLS material is loaded
    /// here so configuration errors surface before any connect attempt.
    pub fn start(config: &OutputConfig, client_id: impl Into<String>) -> Result<Self, ConfigError> {
        let connector = Connector::from_config(config)?;
        let session = Session::new(SessionConfig::from_output(config, client_id));
        let dispatcher = Dispatcher::from_config(config);

        info!(
            "Publishing MQTT data to {}{}",
            config.address(),
            if connector.uses_tls() { " (TLS)" } else { "" }
        );
        for (kind, template) in [
            ("device info", &config.devices),
            ("events", &config.events),
            ("states", &config.states),
        ] {
            if let Some(template) = template {
                info!("Publishing {} to MQTT topic \"{}\"", kind, template);
            }
        }
        if !connector.uses_tls() && config.tls.cert.is_some() {
            warn!("tls_cert is ignored without tls_ca_cert or an mqtts URL");
        }
        debug!("MQTT client id {}", session.config().client_id);

        Ok(Self::spawn(session, dispatcher, connector))
    }

    /// Start an output from already built parts
    pub fn spawn(session: Session, dispatcher: Dispatcher, connector: Connector) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(session.state()));
        let event_loop = EventLoop::new(session, dispatcher, connector, status.clone());
        let task = tokio::spawn(event_loop.run(command_rx));

        Self {
            commands,
            status,
            task,
        }
    }

    /// Queue an event for publishing
    pub fn publish(&self, event: Event) -> Result<(), ClientError> {
        self.commands
            .send(OutputCommand::Publish(event))
            .map_err(|_| ClientError::Closed)
    }

    /// Current connection state
    pub fn status(&self) -> ConnectionState {
        *self.status.read()
    }

    /// Disconnect from the broker and wait for the task to finish
    ///
    /// Events queued before this call are processed first.
    pub async fn shutdown(self) -> Result<(), ClientError> {
        // A closed channel means the task already stopped
        let _ = self.commands.send(OutputCommand::Shutdown);
        self.task
            .await
            .map_err(|e| ClientError::Task(e.to_string()))
    }
}

struct EventLoop {
    session: Session,
    dispatcher: Dispatcher,
    connector: Connector,
    status: Arc<RwLock<ConnectionState>>,
    stream: Option<BoxedStream>,
    connecting: Option<ConnectFuture>,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    sweep: Interval,
    keep_alive: Interval,
}

impl EventLoop {
    fn new(
        session: Session,
        dispatcher: Dispatcher,
        connector: Connector,
        status: Arc<RwLock<ConnectionState>>,
    ) -> Self {
        let mut sweep = interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let keep_alive_secs = u64::from(session.config().keep_alive.max(1));
        let mut keep_alive = interval(Duration::from_secs(keep_alive_secs));
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keep_alive.reset();

        Self {
            session,
            dispatcher,
            connector,
            status,
            stream: None,
            connecting: None,
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            sweep,
            keep_alive,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<OutputCommand>) {
        self.session.start();
        let sweep_enabled = self.session.config().qos.requires_ack();

        loop {
            self.run_actions().await;
            if self.session.state() == ConnectionState::ShuttingDown {
                break;
            }

            tokio::select! {
                command = commands.recv() => match command {
                    Some(OutputCommand::Publish(event)) => self.publish(&event),
                    Some(OutputCommand::Shutdown) | None => {
                        debug!("MQTT output shutting down");
                        self.session.shutdown();
                    }
                },
                result = next_connection(&mut self.connecting) => self.on_connect(result),
                result = read_stream(&mut self.stream, &mut self.read_buf) => self.on_read(result),
                _ = self.sweep.tick(), if sweep_enabled => {
                    self.session.handle(ConnectionEvent::Tick, now());
                }
                _ = self.keep_alive.tick() => {
                    self.session.handle(ConnectionEvent::KeepAlive, now());
                }
            }
        }

        debug!("MQTT output stopped");
    }

    fn publish(&mut self, event: &Event) {
        let mut publisher = SessionPublisher {
            session: &mut self.session,
            now: now(),
        };
        self.dispatcher.dispatch(event, &mut publisher);
    }

    /// Carry out everything the session queued
    async fn run_actions(&mut self) {
        while let Some(action) = self.session.poll_action() {
            match action {
                Action::Connect => {
                    self.stream = None;
                    let connector = self.connector.clone();
                    self.connecting = Some(Box::pin(async move { connector.connect().await }));
                }
                Action::Send(packet) => self.send(packet).await,
                Action::Close => {
                    self.connecting = None;
                    if let Some(mut stream) = self.stream.take() {
                        if let Err(e) = stream.shutdown().await {
                            trace!("MQTT shutdown: {}", e);
                        }
                    }
                }
            }
        }
        *self.status.write() = self.session.state();
    }

    async fn send(&mut self, packet: Packet) {
        let Some(stream) = self.stream.as_mut() else {
            trace!("No connection, dropping {}", packet.name());
            return;
        };

        self.write_buf.clear();
        if let Err(e) = self.encoder.encode(&packet, &mut self.write_buf) {
            warn!("Failed to encode {}: {}", packet.name(), e);
            return;
        }

        let result = match stream.write_all(&self.write_buf).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("MQTT write failed: {}", e);
            self.transport_closed();
        }
    }

    fn on_connect(&mut self, result: io::Result<BoxedStream>) {
        self.connecting = None;
        match result {
            Ok(stream) => {
                self.stream = Some(stream);
                self.read_buf.clear();
                self.keep_alive.reset();
                self.session
                    .handle(ConnectionEvent::TransportConnected, now());
            }
            Err(e) => self.session.handle(
                ConnectionEvent::ConnectFailed {
                    kind: e.kind(),
                    reason: e.to_string(),
                },
                now(),
            ),
        }
    }

    fn on_read(&mut self, result: io::Result<usize>) {
        match result {
            Ok(0) => {
                debug!("MQTT connection closed by broker");
                self.transport_closed();
            }
            Ok(_) => self.decode_packets(),
            Err(e) => {
                warn!("MQTT read failed: {}", e);
                self.transport_closed();
            }
        }
    }

    fn decode_packets(&mut self) {
        loop {
            match self.decoder.decode(&self.read_buf) {
                Ok(Some((packet, len))) => {
                    self.read_buf.advance(len);
                    trace!("MQTT received {}", packet.name());
                    self.session.handle(ConnectionEvent::Packet(packet), now());
                }
                Ok(None) => break,
                Err(e) => {
                    // The stream cannot be resynchronized after a framing error
                    warn!("Malformed packet from broker: {}", e);
                    self.transport_closed();
                    break;
                }
            }
        }
    }

    fn transport_closed(&mut self) {
        self.stream = None;
        self.read_buf.clear();
        self.session.handle(ConnectionEvent::Closed, now());
    }
}

async fn next_connection(connecting: &mut Option<ConnectFuture>) -> io::Result<BoxedStream> {
    match connecting.as_mut() {
        Some(connect) => connect.await,
        None => pending().await,
    }
}

async fn read_stream(stream: &mut Option<BoxedStream>, buf: &mut BytesMut) -> io::Result<usize> {
    match stream.as_mut() {
        Some(stream) => {
            buf.reserve(READ_BUFFER_SIZE);
            stream.read_buf(buf).await
        }
        None => pending().await,
    }
}

/// Current time on the tokio clock, so paused-time tests see it advance
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
