//! Publish Dispatcher
//!
//! Routes one decoded event to the configured topics:
//! - events without a `model` field are state updates and go to the
//!   states topic as a single JSON payload
//! - device events go to the events topic as a single JSON payload
//! - device events are also split per field under the devices topic,
//!   one publish per scalar value

use tracing::{error, warn};

use crate::config::OutputConfig;
use crate::event::{Event, Value};
use crate::topic::{validate_topic_name, TopicBuffer, TopicError, TopicTemplate};

#[cfg(test)]
mod tests;

/// Largest serialized state update that will be published
pub const STATE_PAYLOAD_LIMIT: usize = 20000;

/// Largest serialized event that will be published
pub const EVENT_PAYLOAD_LIMIT: usize = 2048;

/// Fields that only select the device topic and are never published
const SKIPPED_FIELDS: [&str; 3] = ["type", "model", "subtype"];

/// Sink for rendered topic/payload pairs
pub trait Publisher {
    fn publish(&mut self, topic: &str, payload: &[u8]);
}

/// Splits events into publishes
#[derive(Debug, Clone)]
pub struct Dispatcher {
    devices: Option<TopicTemplate>,
    events: Option<TopicTemplate>,
    states: Option<TopicTemplate>,
    hostname: String,
    topic: TopicBuffer,
}

impl Dispatcher {
    pub fn new(
        devices: Option<TopicTemplate>,
        events: Option<TopicTemplate>,
        states: Option<TopicTemplate>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            devices,
            events,
            states,
            hostname: hostname.into(),
            topic: TopicBuffer::new(),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(
            config.devices.clone(),
            config.events.clone(),
            config.states.clone(),
            config.hostname.clone(),
        )
    }

    /// Publish `event` through `publisher`
    pub fn dispatch<P: Publisher>(&mut self, event: &Event, publisher: &mut P) {
        self.topic.clear();

        if !event.contains_key("model") {
            if let Some(states) = &self.states {
                publish_json(
                    &mut self.topic,
                    states,
                    event,
                    &self.hostname,
                    STATE_PAYLOAD_LIMIT,
                    publisher,
                );
            }
            return;
        }

        if let Some(events) = &self.events {
            publish_json(
                &mut self.topic,
                events,
                event,
                &self.hostname,
                EVENT_PAYLOAD_LIMIT,
                publisher,
            );
        }

        let Some(devices) = &self.devices else {
            return;
        };
        if let Err(e) = devices.render(&mut self.topic, event, &self.hostname) {
            error!("Devices topic skipped: {}", e);
            return;
        }
        publish_fields(&mut self.topic, event, publisher);
        self.topic.clear();
    }
}

fn publish_json<P: Publisher>(
    topic: &mut TopicBuffer,
    template: &TopicTemplate,
    event: &Event,
    hostname: &str,
    limit: usize,
    publisher: &mut P,
) {
    let payload = match event.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    if payload.len() >= limit {
        warn!(
            "Event of {} bytes exceeds the {} byte limit, skipped",
            payload.len(),
            limit
        );
        return;
    }

    match template.render(topic, event, hostname) {
        Ok(_) => publish_checked(topic.as_str(), payload.as_bytes(), publisher),
        Err(e) => error!("Topic skipped: {}", e),
    }
    topic.clear();
}

/// Publish each field of `event` below the current topic
fn publish_fields<P: Publisher>(topic: &mut TopicBuffer, event: &Event, publisher: &mut P) {
    for (key, value) in event.iter() {
        if SKIPPED_FIELDS.contains(&key) {
            continue;
        }
        match topic.push_segment(key) {
            Ok(mark) => {
                publish_value(topic, value, publisher);
                topic.truncate(mark);
            }
            Err(e) => overflow(topic, key, e),
        }
    }
}

fn publish_value<P: Publisher>(topic: &mut TopicBuffer, value: &Value, publisher: &mut P) {
    match value {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let index = index.to_string();
                match topic.push_segment(&index) {
                    Ok(mark) => {
                        publish_value(topic, item, publisher);
                        topic.truncate(mark);
                    }
                    Err(e) => overflow(topic, &index, e),
                }
            }
        }
        Value::Object(nested) => publish_fields(topic, nested, publisher),
        scalar => {
            if let Some(text) = scalar.to_text() {
                publish_checked(topic.as_str(), text.as_bytes(), publisher);
            }
        }
    }
}

fn publish_checked<P: Publisher>(topic: &str, payload: &[u8], publisher: &mut P) {
    match validate_topic_name(topic) {
        Ok(()) => publisher.publish(topic, payload),
        Err(reason) => warn!("Invalid topic \"{}\" skipped: {}", topic, reason),
    }
}

fn overflow(topic: &TopicBuffer, segment: &str, e: TopicError) {
    error!("Topic {}/{} skipped: {}", topic, segment, e);
}
