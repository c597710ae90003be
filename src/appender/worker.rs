//! The appender worker: a single task owning all connection state.
//!
//! Every mutation of the state machine happens here, driven by commands from
//! the handle, the per-connection I/O tasks and the reconnect timers. The
//! only state touched from other tasks is the shared atomics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::GelfConfig;
use crate::event::LogEvent;

use super::buffer::PendingBuffer;
use super::conn::Connection;
use super::Shared;

/// Commands processed by the worker in arrival order.
pub(crate) enum Command {
    /// Deliver one event.
    Send(Envelope),
    /// A connection's I/O task observed closure.
    ConnectionClosed { generation: u64 },
    /// A scheduled reconnect delay elapsed.
    Reconnect,
    /// Begin shutdown; `ack` fires once the connection is closed.
    Stop { ack: oneshot::Sender<()> },
}

/// An event and its retry ticket: a failed transmission may requeue the
/// event exactly once.
pub(crate) struct Envelope {
    pub(crate) event: LogEvent,
    retried: bool,
}

impl Envelope {
    pub(crate) fn first(event: LogEvent) -> Self {
        Self {
            event,
            retried: false,
        }
    }

    /// The retry envelope for a failed attempt, or `None` if this was the
    /// retry already.
    pub(crate) fn into_retry(self) -> Option<Envelope> {
        if self.retried {
            return None;
        }
        Some(Envelope {
            event: self.event,
            retried: true,
        })
    }
}

/// Requeue a failed envelope for its single retry, or drop it for good.
pub(crate) fn requeue_once(
    envelope: Envelope,
    cmd_tx: &UnboundedSender<Command>,
    shared: &Shared,
) {
    match envelope.into_retry() {
        Some(retry) => {
            shared.stats.retries.fetch_add(1, Ordering::Relaxed);
            let _ = cmd_tx.send(Command::Send(retry));
        }
        None => warn!("Dropping event after failed retry"),
    }
}

enum ConnState {
    Disconnected,
    Connecting,
    Connected(Connection),
}

pub(crate) struct Worker {
    config: Arc<GelfConfig>,
    shared: Arc<Shared>,
    cmd_tx: UnboundedSender<Command>,
    cmd_rx: UnboundedReceiver<Command>,
    state: ConnState,
    buffer: PendingBuffer,
    next_generation: u64,
    stop_requested: bool,
    stop_ack: Option<oneshot::Sender<()>>,
}

impl Worker {
    pub(crate) fn new(
        config: Arc<GelfConfig>,
        shared: Arc<Shared>,
        cmd_tx: UnboundedSender<Command>,
        cmd_rx: UnboundedReceiver<Command>,
        conn: Connection,
    ) -> Self {
        let buffer = PendingBuffer::new(config.buffer_capacity);
        let next_generation = conn.generation + 1;
        Self {
            config,
            shared,
            cmd_tx,
            cmd_rx,
            state: ConnState::Connected(conn),
            buffer,
            next_generation,
            stop_requested: false,
            stop_ack: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            // Once stopping, the worker exits as soon as nothing is in
            // flight. Checked before waiting so an already-drained stop
            // closes immediately.
            if self.stop_requested && self.shared.in_flight() == 0 {
                break;
            }
            tokio::select! {
                maybe = self.cmd_rx.recv() => match maybe {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = self.shared.drained.notified(), if self.stop_requested => {}
            }
        }

        if !self.buffer.is_empty() {
            info!(
                discarded = self.buffer.len(),
                "Discarding events buffered while disconnected"
            );
            self.shared.stats.buffered.store(0, Ordering::Relaxed);
        }
        self.close_connection();
        if let Some(ack) = self.stop_ack.take() {
            let _ = ack.send(());
        }
        debug!("Appender worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Send(envelope) => self.dispatch(envelope),
            Command::ConnectionClosed { generation } => self.on_connection_closed(generation),
            Command::Reconnect => self.reconnect().await,
            Command::Stop { ack } => {
                debug!(in_flight = self.shared.in_flight(), "Stop requested");
                self.stop_requested = true;
                self.stop_ack = Some(ack);
            }
        }
    }

    /// Route one event according to the connection state at this moment.
    fn dispatch(&mut self, envelope: Envelope) {
        let (generation, envelope) = match &self.state {
            ConnState::Connected(conn) => {
                if !self.shared.try_acquire() {
                    self.shared
                        .stats
                        .dropped_in_flight
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        max_in_flight = self.config.max_in_flight,
                        "In-flight cap reached, dropping event"
                    );
                    return;
                }
                match conn.submit(envelope) {
                    Ok(()) => return,
                    Err(envelope) => (conn.generation, envelope),
                }
            }
            _ => {
                if self.buffer.push(envelope.event) {
                    self.shared
                        .stats
                        .buffered
                        .store(self.buffer.len(), Ordering::Relaxed);
                } else {
                    self.shared
                        .stats
                        .dropped_buffer
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        capacity = self.config.buffer_capacity,
                        "Buffer full while disconnected, dropping event"
                    );
                }
                return;
            }
        };

        // The writer refused the envelope: its task is gone. Complete this
        // attempt's accounting, tear the connection down, and requeue the
        // event for its one retry.
        self.shared.release();
        self.shared
            .stats
            .send_failures
            .fetch_add(1, Ordering::Relaxed);
        self.on_connection_closed(generation);
        requeue_once(envelope, &self.cmd_tx, &self.shared);
    }

    fn on_connection_closed(&mut self, generation: u64) {
        let current = matches!(
            &self.state,
            ConnState::Connected(conn) if conn.generation == generation
        );
        if !current {
            debug!(generation, "Ignoring stale connection-closed signal");
            return;
        }

        self.close_connection();
        self.shared.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        warn!(addr = %self.config.addr(), "Connection to collector lost");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        if self.stop_requested || self.shared.is_stopping() {
            return;
        }
        let delay = self.config.reconnect_delay;
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = cmd_tx.send(Command::Reconnect);
        });
    }

    async fn reconnect(&mut self) {
        if self.stop_requested {
            debug!("Ignoring reconnect attempt during shutdown");
            return;
        }
        if !matches!(self.state, ConnState::Disconnected) {
            return;
        }

        self.state = ConnState::Connecting;
        let generation = self.next_generation;
        self.next_generation += 1;

        match Connection::open(
            &self.config,
            Arc::clone(&self.shared),
            self.cmd_tx.clone(),
            generation,
        )
        .await
        {
            Ok(conn) => {
                info!(addr = %self.config.addr(), "Reconnected to GELF collector");
                self.shared.set_connected(true);
                self.shared.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                self.state = ConnState::Connected(conn);
                self.flush_buffer();
            }
            Err(error) => {
                self.shared
                    .stats
                    .reconnect_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %error,
                    delay = ?self.config.reconnect_delay,
                    "Reconnect failed, will retry"
                );
                self.state = ConnState::Disconnected;
                self.schedule_reconnect();
            }
        }
    }

    /// Drain the buffer oldest-first through the normal send path, so each
    /// flushed event is subject to the same accounting and backpressure as a
    /// fresh one. Stops early if the connection drops mid-flush.
    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        info!(
            buffered = self.buffer.len(),
            "Flushing events buffered while disconnected"
        );
        while matches!(self.state, ConnState::Connected(_)) {
            let Some(event) = self.buffer.pop() else { break };
            self.dispatch(Envelope::first(event));
        }
        self.shared
            .stats
            .buffered
            .store(self.buffer.len(), Ordering::Relaxed);
    }

    fn close_connection(&mut self) {
        if let ConnState::Connected(conn) =
            std::mem::replace(&mut self.state, ConnState::Disconnected)
        {
            conn.teardown();
        }
        self.shared.set_connected(false);
    }
}
