//! sensormq - MQTT output for decoded sensor events
//!
//! Publishes events to an MQTT 3.1.1 broker over a persistent,
//! self-reconnecting connection. Topics are rendered from small templates
//! such as `rtl_433/[hostname]/devices[/model][/id]`, and QoS 1 publishes
//! are retransmitted until the broker acknowledges them.

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod protocol;
pub mod topic;

pub use client::{ConnectionState, MqttOutput, Session, SessionConfig};
pub use config::{Config, OutputConfig};
pub use dispatch::{Dispatcher, Publisher};
pub use event::{Event, Value};
pub use protocol::QoS;
pub use topic::{TopicBuffer, TopicTemplate};
