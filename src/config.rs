//! Appender configuration.
//!
//! Everything is fixed at construction time: the collector endpoint, the
//! sender identity stamped on every message, and the resilience tuning
//! (connect timeout, reconnect delay, disconnected-buffer capacity,
//! in-flight cap).

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{GelfError, Result};
use crate::event::Value;

/// Conventional GELF TCP port.
pub const DEFAULT_PORT: u16 = 12201;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_BUFFER_CAPACITY: usize = 10_000;
const DEFAULT_MAX_IN_FLIGHT: usize = 1_024;

/// Configuration for a [`GelfAppender`](crate::GelfAppender).
#[derive(Debug, Clone)]
pub struct GelfConfig {
    /// Collector hostname or address.
    pub host: String,
    /// Collector TCP port.
    pub port: u16,
    /// Value of the `host` field on every message (the sender's identity).
    pub sender_host: String,
    /// Value of the `_facility` field on every message.
    pub facility: String,
    /// Static fields stamped on every message, before event fields.
    pub additional_fields: HashMap<String, Value>,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Capacity of the FIFO buffer filled while disconnected.
    pub buffer_capacity: usize,
    /// Maximum writes outstanding on the connection at once.
    pub max_in_flight: usize,
}

impl GelfConfig {
    /// Configuration for a collector at `host`, with defaults everywhere else.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            sender_host: "localhost".to_string(),
            facility: "gelfkit".to_string(),
            additional_fields: HashMap::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Load configuration from `GELF_*` environment variables.
    ///
    /// `GELF_HOST` is required; `GELF_PORT`, `GELF_SENDER_HOST`,
    /// `GELF_FACILITY`, `GELF_CONNECT_TIMEOUT_MS`, `GELF_RECONNECT_DELAY_MS`,
    /// `GELF_BUFFER_CAPACITY` and `GELF_MAX_IN_FLIGHT` override their
    /// defaults when set.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("GELF_HOST")
            .map_err(|_| GelfError::Config("GELF_HOST is not set".to_string()))?;
        let mut config = Self::new(host);

        if let Ok(port) = std::env::var("GELF_PORT") {
            config.port = port
                .parse()
                .map_err(|_| GelfError::Config(format!("invalid GELF_PORT: {port}")))?;
        }
        if let Ok(sender) = std::env::var("GELF_SENDER_HOST") {
            config.sender_host = sender;
        }
        if let Ok(facility) = std::env::var("GELF_FACILITY") {
            config.facility = facility;
        }
        if let Ok(timeout) = std::env::var("GELF_CONNECT_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                GelfError::Config(format!("invalid GELF_CONNECT_TIMEOUT_MS: {timeout}"))
            })?;
            config.connect_timeout = Duration::from_millis(millis);
        }
        if let Ok(delay) = std::env::var("GELF_RECONNECT_DELAY_MS") {
            let millis: u64 = delay.parse().map_err(|_| {
                GelfError::Config(format!("invalid GELF_RECONNECT_DELAY_MS: {delay}"))
            })?;
            config.reconnect_delay = Duration::from_millis(millis);
        }
        if let Ok(capacity) = std::env::var("GELF_BUFFER_CAPACITY") {
            config.buffer_capacity = capacity.parse().map_err(|_| {
                GelfError::Config(format!("invalid GELF_BUFFER_CAPACITY: {capacity}"))
            })?;
        }
        if let Ok(max) = std::env::var("GELF_MAX_IN_FLIGHT") {
            config.max_in_flight = max
                .parse()
                .map_err(|_| GelfError::Config(format!("invalid GELF_MAX_IN_FLIGHT: {max}")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Override the collector port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the sender identity.
    pub fn with_sender_host(mut self, sender_host: impl Into<String>) -> Self {
        self.sender_host = sender_host.into();
        self
    }

    /// Override the facility name.
    pub fn with_facility(mut self, facility: impl Into<String>) -> Self {
        self.facility = facility.into();
        self
    }

    /// Stamp a static field on every message. Event fields win collisions.
    pub fn with_additional_field(
        mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.additional_fields.insert(name.into(), value.into());
        self
    }

    /// Override the connection attempt bound.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the fixed reconnect delay.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Override the disconnected-buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Override the in-flight cap.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Collector endpoint as `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject configurations the appender cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(GelfError::Config("collector host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(GelfError::Config("collector port is 0".to_string()));
        }
        if self.buffer_capacity == 0 {
            return Err(GelfError::Config("buffer capacity is 0".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(GelfError::Config("connect timeout is 0".to_string()));
        }
        Ok(())
    }
}
