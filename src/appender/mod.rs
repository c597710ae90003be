//! Resilient GELF appender.
//!
//! The appender owns one outbound TCP connection to the collector and keeps
//! working through connection loss:
//!
//! ```text
//!            start()                    peer closes / write fails
//! [created] ────────► [Connected] ─────────────────────► [Disconnected]
//!                          ▲                                   │
//!                          │ connect ok: flush buffer FIFO     │ fixed delay,
//!                          └────────── [Connecting] ◄──────────┘ forever
//! ```
//!
//! `process` never blocks: it wraps the event in a command and hands it to a
//! single worker task that owns all connection state. While connected, each
//! write claims a slot against an in-flight cap; while disconnected, events
//! queue in a bounded FIFO that drops the newest on overflow. `stop()` waits
//! for in-flight writes to finish, then closes the connection and discards
//! whatever is still buffered.

mod buffer;
mod conn;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info};

use crate::config::GelfConfig;
use crate::error::{GelfError, Result};
use crate::event::LogEvent;
use crate::pipeline::Stage;

use self::conn::Connection;
use self::worker::{Command, Envelope, Worker};

/// Delivery counters. Plain atomics; reads are advisory.
#[derive(Default)]
struct Stats {
    sent: AtomicU64,
    send_failures: AtomicU64,
    retries: AtomicU64,
    dropped_in_flight: AtomicU64,
    dropped_buffer: AtomicU64,
    buffered: AtomicUsize,
    reconnects: AtomicU64,
    reconnect_failures: AtomicU64,
    disconnects: AtomicU64,
}

/// Point-in-time snapshot of an appender's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppenderStats {
    /// Events written to the collector.
    pub sent: u64,
    /// Write attempts that failed.
    pub send_failures: u64,
    /// Events requeued for their single retry.
    pub retries: u64,
    /// Events dropped because the in-flight cap was reached.
    pub dropped_in_flight: u64,
    /// Events dropped because the disconnected buffer was full.
    pub dropped_buffer: u64,
    /// Events currently buffered while disconnected.
    pub buffered: usize,
    /// Writes currently outstanding.
    pub in_flight: usize,
    /// Successful reconnections.
    pub reconnects: u64,
    /// Failed reconnection attempts.
    pub reconnect_failures: u64,
    /// Times the connection was lost.
    pub disconnects: u64,
    /// Whether the connection is currently up.
    pub connected: bool,
}

/// State shared between the handle, the worker and the per-connection I/O
/// tasks. Everything here is atomic; the worker owns the rest.
struct Shared {
    max_in_flight: usize,
    in_flight: AtomicUsize,
    stopping: AtomicBool,
    drained: Notify,
    connected: AtomicBool,
    stats: Stats,
}

impl Shared {
    fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            in_flight: AtomicUsize::new(0),
            stopping: AtomicBool::new(false),
            drained: Notify::new(),
            connected: AtomicBool::new(false),
            stats: Stats::default(),
        }
    }

    /// Claim an in-flight slot. Refuses once the cap is reached, leaving the
    /// counter where it was.
    fn try_acquire(&self) -> bool {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) + 1 > self.max_in_flight {
            self.release();
            return false;
        }
        true
    }

    /// Complete one in-flight attempt, successful or not. The last completion
    /// during shutdown wakes the worker's drain wait.
    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1
            && self.stopping.load(Ordering::Acquire)
        {
            self.drained.notify_one();
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

enum Boot {
    Idle(UnboundedReceiver<Command>),
    Running,
    Stopped,
}

/// Ships [`LogEvent`]s to a GELF collector over a persistent TCP connection.
///
/// Cheap to clone; clones drive the same connection. As a [`Stage`] it
/// forwards every event unchanged, so it composes mid-pipeline.
#[derive(Clone)]
pub struct GelfAppender {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<GelfConfig>,
    cmd_tx: UnboundedSender<Command>,
    shared: Arc<Shared>,
    boot: Mutex<Boot>,
}

impl GelfAppender {
    /// Build an appender for `config`. Nothing connects until [`start`].
    ///
    /// [`start`]: GelfAppender::start
    pub fn new(config: GelfConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(config.max_in_flight));
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                cmd_tx,
                shared,
                boot: Mutex::new(Boot::Idle(cmd_rx)),
            }),
        }
    }

    /// Connect to the collector and launch the delivery worker.
    ///
    /// Blocks until the connection is up or failed. On failure the appender
    /// is left startable, so callers may retry. Calling `start` twice, or
    /// after [`stop`](GelfAppender::stop), returns
    /// [`GelfError::AlreadyStarted`].
    pub async fn start(&self) -> Result<()> {
        self.inner.config.validate()?;

        let cmd_rx = {
            let mut boot = self.inner.boot.lock();
            match std::mem::replace(&mut *boot, Boot::Running) {
                Boot::Idle(rx) => rx,
                other => {
                    *boot = other;
                    return Err(GelfError::AlreadyStarted);
                }
            }
        };

        let conn = match Connection::open(
            &self.inner.config,
            Arc::clone(&self.inner.shared),
            self.inner.cmd_tx.clone(),
            0,
        )
        .await
        {
            Ok(conn) => conn,
            Err(err) => {
                *self.inner.boot.lock() = Boot::Idle(cmd_rx);
                return Err(err);
            }
        };

        info!(addr = %self.inner.config.addr(), "Connected to GELF collector");
        self.inner.shared.set_connected(true);

        let worker = Worker::new(
            Arc::clone(&self.inner.config),
            Arc::clone(&self.inner.shared),
            self.inner.cmd_tx.clone(),
            cmd_rx,
            conn,
        );
        tokio::spawn(worker.run());
        Ok(())
    }

    /// Shut the appender down.
    ///
    /// Marks the appender as stopping (no new reconnects will be scheduled),
    /// waits for every in-flight write to complete, then closes the
    /// connection. Events still buffered from a disconnection are discarded.
    /// Always completes; stopping twice or before `start` returns
    /// immediately.
    pub async fn stop(&self) {
        self.inner.shared.stopping.store(true, Ordering::Release);

        {
            let mut boot = self.inner.boot.lock();
            match std::mem::replace(&mut *boot, Boot::Stopped) {
                Boot::Running => {}
                _ => return,
            }
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .inner
            .cmd_tx
            .send(Command::Stop { ack: ack_tx })
            .is_err()
        {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Whether the connection to the collector is currently up.
    pub fn is_connected(&self) -> bool {
        self.inner.shared.connected.load(Ordering::Relaxed)
    }

    /// Snapshot the delivery counters.
    pub fn stats(&self) -> AppenderStats {
        let shared = &self.inner.shared;
        let stats = &shared.stats;
        AppenderStats {
            sent: stats.sent.load(Ordering::Relaxed),
            send_failures: stats.send_failures.load(Ordering::Relaxed),
            retries: stats.retries.load(Ordering::Relaxed),
            dropped_in_flight: stats.dropped_in_flight.load(Ordering::Relaxed),
            dropped_buffer: stats.dropped_buffer.load(Ordering::Relaxed),
            buffered: stats.buffered.load(Ordering::Relaxed),
            in_flight: shared.in_flight(),
            reconnects: stats.reconnects.load(Ordering::Relaxed),
            reconnect_failures: stats.reconnect_failures.load(Ordering::Relaxed),
            disconnects: stats.disconnects.load(Ordering::Relaxed),
            connected: shared.connected.load(Ordering::Relaxed),
        }
    }

    fn enqueue(&self, event: LogEvent) {
        if self
            .inner
            .cmd_tx
            .send(Command::Send(Envelope::first(event)))
            .is_err()
        {
            debug!("Appender stopped, event discarded");
        }
    }
}

impl Stage for GelfAppender {
    type Input = LogEvent;
    type Output = LogEvent;

    /// Queue the event for delivery and pass it through unchanged.
    fn process(&self, event: LogEvent) -> Option<LogEvent> {
        self.enqueue(event.clone());
        Some(event)
    }
}
