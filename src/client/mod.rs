//! MQTT Client
//!
//! Publishing side of an MQTT 3.1.1 connection:
//! - `inflight`: unacknowledged publishes awaiting PUBACK
//! - `session`: the sans-IO connection state machine
//! - `transport`: TCP and TLS connection setup
//! - `runtime`: the tokio task tying them to a socket

mod inflight;
mod runtime;
mod session;
mod tls;
mod transport;

#[cfg(test)]
mod tests;

pub use inflight::{InflightMessage, InflightTracker, ACK_WINDOW};
pub use runtime::{ClientError, MqttOutput, SWEEP_INTERVAL};
pub use session::{
    Action, ConnectionEvent, ConnectionState, Session, SessionConfig, SessionPublisher,
    KEEP_ALIVE_SECS,
};
pub use tls::{load_tls_connector, TlsError};
pub use transport::{AsyncStream, BoxedStream, Connector, CONNECT_TIMEOUT};
