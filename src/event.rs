//! Core event model: severity levels, field values, and the log event record.
//!
//! Events are immutable once built. Field values are restricted to what the
//! GELF wire format can carry (text or a number) so conversion happens once,
//! at the call site, instead of at encode time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Syslog-style severity rank. A smaller rank is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl Level {
    /// Numeric rank as carried in the `level` field on the wire.
    pub fn severity(self) -> u8 {
        match self {
            Level::Fatal => 3,
            Level::Error => 4,
            Level::Warn => 5,
            Level::Info => 6,
            Level::Debug => 7,
        }
    }

    /// Inverse of [`Level::severity`].
    pub fn from_severity(rank: u8) -> Option<Level> {
        match rank {
            3 => Some(Level::Fatal),
            4 => Some(Level::Error),
            5 => Some(Level::Warn),
            6 => Some(Level::Info),
            7 => Some(Level::Debug),
            _ => None,
        }
    }
}

/// A field value: GELF additional fields are text or numbers, nothing nested.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Number(f64),
}

fn integral(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&n) {
        Some(n as i64)
    } else {
        None
    }
}

// Mathematically integral numbers must encode without a fractional part
// (`"level":6`, not `"level":6.0`); collectors treat `level` as an integer.
// Non-finite numbers have no JSON representation (serde_json emits `null`,
// which the wire contract forbids), so they encode as their text rendering.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Text(text) => serializer.serialize_str(text),
            Value::Number(n) if !n.is_finite() => serializer.serialize_str(&n.to_string()),
            Value::Number(n) => match integral(*n) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*n),
            },
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Text(text) => f.write_str(text),
            Value::Number(n) => match integral(*n) {
                Some(i) => write!(f, "{i}"),
                None => write!(f, "{n}"),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

/// A single structured log event.
///
/// Built once, then handed to a pipeline. Field names are unique within an
/// event; writing the same name twice keeps the last value.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub short_message: String,
    pub fields: HashMap<String, Value>,
}

impl LogEvent {
    /// Create an event stamped with the current time and no fields.
    pub fn new(level: Level, short_message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            short_message: short_message.into(),
            fields: HashMap::new(),
        }
    }

    /// Attach a structured field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Override the capture timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
