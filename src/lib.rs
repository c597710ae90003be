//! gelfkit - Resilient GELF log shipping
//!
//! Ship structured log events to a Graylog-style collector over a persistent
//! TCP connection, without blocking the application and without giving up on
//! transient connectivity loss.
//!
//! ```text
//! app ──► Logger ──► [ThresholdFilter] ──► [GelfAppender] ──► TCP ──► collector
//!                                                │
//!                                                └──► [ConsoleAppender] ──► stdout
//! ```
//!
//! Events flow through a [`Pipeline`] of [`Stage`]s. The [`GelfAppender`]
//! keeps shipping through connection loss: it reconnects on a fixed delay,
//! buffers a bounded number of events while disconnected, caps the writes in
//! flight, and drains cleanly on shutdown.
//!
//! ## Example
//!
//! ```no_run
//! use gelfkit::{configure_logging, GelfAppender, GelfConfig, Level, Pipeline, ThresholdFilter};
//!
//! # async fn run() -> gelfkit::Result<()> {
//! let appender = GelfAppender::new(
//!     GelfConfig::new("graylog.internal")
//!         .with_sender_host("api-1")
//!         .with_facility("checkout"),
//! );
//! appender.start().await?;
//!
//! let pipeline =
//!     Pipeline::from_stage(ThresholdFilter::new(Level::Info)).then(appender.clone());
//! let log = configure_logging(pipeline);
//! log.info("service ready");
//!
//! appender.stop().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod appender;
pub mod codec;
pub mod config;
pub mod console;
pub mod error;
pub mod event;
pub mod logger;
pub mod pipeline;

pub use appender::{AppenderStats, GelfAppender};
pub use codec::{GelfCodec, GELF_VERSION};
pub use config::{GelfConfig, DEFAULT_PORT};
pub use console::ConsoleAppender;
pub use error::{GelfError, Result};
pub use event::{Level, LogEvent, Value};
pub use logger::{configure_logging, logger, Logger};
pub use pipeline::{Branch, IdentityStage, Pipeline, Stage, ThresholdFilter};
