//! GELF TCP wire codec.
//!
//! Each event becomes one self-delimited message: a JSON object followed by a
//! single NUL byte. JSON escapes any NUL inside string values, so the
//! terminator is the only raw zero byte on the wire.
//!
//! ```text
//! {"version":"1.1","host":"api-1","timestamp":1712345678.25,"level":6,
//!  "short_message":"listener ready","_facility":"checkout","_port":8443}\0
//! ```

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::config::GelfConfig;
use crate::error::GelfError;
use crate::event::{LogEvent, Value};

/// GELF format version stamped on every message.
pub const GELF_VERSION: &str = "1.1";

/// Encodes [`LogEvent`]s into NUL-terminated GELF messages.
///
/// The sender identity, facility and static additional fields are fixed at
/// construction; per-event fields are merged on top, so an event field wins
/// a name collision with a static one.
pub struct GelfCodec {
    sender_host: String,
    facility: String,
    additional_fields: HashMap<String, Value>,
}

impl GelfCodec {
    pub fn new(config: &GelfConfig) -> Self {
        Self {
            sender_host: config.sender_host.clone(),
            facility: config.facility.clone(),
            additional_fields: config.additional_fields.clone(),
        }
    }

    fn to_wire(&self, event: &LogEvent) -> HashMap<String, Value> {
        let mut message =
            HashMap::with_capacity(6 + self.additional_fields.len() + event.fields.len());
        message.insert("version".to_string(), Value::Text(GELF_VERSION.to_string()));
        message.insert("host".to_string(), Value::Text(self.sender_host.clone()));
        message.insert("timestamp".to_string(), Value::Number(epoch_seconds(event)));
        message.insert(
            "level".to_string(),
            Value::Number(f64::from(event.level.severity())),
        );
        message.insert(
            "short_message".to_string(),
            Value::Text(event.short_message.clone()),
        );
        message.insert("_facility".to_string(), Value::Text(self.facility.clone()));
        for (name, value) in &self.additional_fields {
            message.insert(format!("_{name}"), value.clone());
        }
        for (name, value) in &event.fields {
            message.insert(format!("_{name}"), value.clone());
        }
        message
    }
}

/// Seconds since the epoch with microsecond precision.
fn epoch_seconds(event: &LogEvent) -> f64 {
    event.timestamp.timestamp_micros() as f64 / 1_000_000.0
}

impl Encoder<LogEvent> for GelfCodec {
    type Error = GelfError;

    fn encode(&mut self, event: LogEvent, dst: &mut BytesMut) -> Result<(), GelfError> {
        let body = serde_json::to_vec(&self.to_wire(&event))?;
        dst.reserve(body.len() + 1);
        dst.put_slice(&body);
        dst.put_u8(0);
        Ok(())
    }
}
