//! Crate error types.
//!
//! The only operation that surfaces an error to callers is appender startup.
//! Everything after that (disconnects, failed writes, overflow) is handled
//! internally with warnings and counters, never an `Err`.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GelfError>;

#[derive(Debug, Error)]
pub enum GelfError {
    /// Invalid or unparsable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The initial connection to the collector could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An event could not be serialized to its wire form.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport-level I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// `start()` was called on an appender that already ran.
    #[error("appender already started")]
    AlreadyStarted,
}
