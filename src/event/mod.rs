//! Decoded sensor events
//!
//! An [`Event`] is an ordered list of named fields as produced by an
//! upstream decoder. Field order is preserved through JSON conversion so
//! the serialized payload matches the decoder's output order.

mod format;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

pub use format::format_double;

/// A field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Value>),
    Object(Event),
}

impl Value {
    /// Text form used as an MQTT payload for scalar values
    ///
    /// Returns `None` for arrays and nested events.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Double(v) => Some(format_double(*v)),
            Value::String(s) => Some(s.clone()),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Event> for Value {
    fn from(v: Event) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

/// An ordered set of uniquely named fields
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    fields: Vec<(String, Value)>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Event::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a field, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(EventError::from)
    }

    /// Parse a JSON object
    pub fn from_json(s: &str) -> Result<Self, EventError> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        Self::try_from(value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Double(v) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(event) => event.serialize(serializer),
        }
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl TryFrom<serde_json::Value> for Event {
    type Error = EventError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Object(map) => {
                let mut event = Event::new();
                for (key, value) in map {
                    let value = convert_value(&key, value)?;
                    event.fields.push((key, value));
                }
                Ok(event)
            }
            other => Err(EventError::NotAnObject(json_kind(&other))),
        }
    }
}

fn convert_value(key: &str, value: serde_json::Value) -> Result<Value, EventError> {
    match value {
        serde_json::Value::Null => Err(EventError::UnsupportedValue {
            key: key.to_string(),
            kind: "null",
        }),
        serde_json::Value::Bool(b) => Ok(Value::Int(b as i64)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => n.as_f64().map(Value::Double).ok_or_else(|| {
                EventError::UnsupportedValue {
                    key: key.to_string(),
                    kind: "number",
                }
            }),
        },
        serde_json::Value::String(s) => Ok(Value::String(s)),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| convert_value(key, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        object @ serde_json::Value::Object(_) => Event::try_from(object).map(Value::Object),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Event conversion errors
#[derive(Debug)]
pub enum EventError {
    /// Input is not valid JSON
    Json(serde_json::Error),
    /// Top-level JSON value is not an object
    NotAnObject(&'static str),
    /// A field holds a value with no event representation
    UnsupportedValue { key: String, kind: &'static str },
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "invalid JSON: {}", e),
            Self::NotAnObject(kind) => write!(f, "expected a JSON object, got {}", kind),
            Self::UnsupportedValue { key, kind } => {
                write!(f, "field \"{}\" has unsupported {} value", key, kind)
            }
        }
    }
}

impl std::error::Error for EventError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => write!(f, "<{}>", self.kind()),
        }
    }
}
