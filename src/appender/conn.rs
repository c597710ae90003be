//! One TCP connection to the collector.
//!
//! A connection is a pair of tasks around a split stream: a writer that
//! encodes and sends envelopes, and a watcher that notices peer-initiated
//! closure. Both report closure to the worker tagged with the connection's
//! generation, so signals from an already-replaced connection are ignored.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::codec::GelfCodec;
use crate::config::GelfConfig;
use crate::error::GelfError;

use super::worker::{requeue_once, Command, Envelope};
use super::Shared;

pub(crate) struct Connection {
    pub(crate) generation: u64,
    envelopes: Sender<Envelope>,
    watcher: JoinHandle<()>,
}

impl Connection {
    /// Connect to the collector and spawn the per-connection tasks.
    pub(crate) async fn open(
        config: &GelfConfig,
        shared: Arc<Shared>,
        cmd_tx: UnboundedSender<Command>,
        generation: u64,
    ) -> Result<Self, GelfError> {
        // A stalled attempt must not wedge the worker loop, so every connect
        // is bounded by the configured timeout.
        let addr = config.addr();
        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| GelfError::Connect {
                addr: addr.clone(),
                source: io::Error::from(io::ErrorKind::TimedOut),
            })?
            .map_err(|source| GelfError::Connect { addr, source })?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        // Capacity matches the in-flight cap, so a submit holding a slot
        // always fits.
        let (envelopes, inbox) = mpsc::channel(config.max_in_flight.max(1));
        let sink = FramedWrite::new(write_half, GelfCodec::new(config));
        tokio::spawn(write_events(
            inbox,
            sink,
            Arc::clone(&shared),
            cmd_tx.clone(),
            generation,
        ));
        let watcher = tokio::spawn(watch_peer(read_half, cmd_tx, generation));

        Ok(Self {
            generation,
            envelopes,
            watcher,
        })
    }

    /// Queue an envelope for writing. The caller must already hold an
    /// in-flight slot. The envelope comes back if the writer is gone.
    pub(crate) fn submit(&self, envelope: Envelope) -> Result<(), Envelope> {
        self.envelopes.try_send(envelope).map_err(|err| match err {
            TrySendError::Full(envelope) | TrySendError::Closed(envelope) => envelope,
        })
    }

    /// Release the connection. The writer winds down once its inbox closes;
    /// the watcher is aborted outright.
    pub(crate) fn teardown(self) {
        self.watcher.abort();
    }
}

async fn write_events(
    mut inbox: Receiver<Envelope>,
    mut sink: FramedWrite<OwnedWriteHalf, GelfCodec>,
    shared: Arc<Shared>,
    cmd_tx: UnboundedSender<Command>,
    generation: u64,
) {
    while let Some(envelope) = inbox.recv().await {
        match sink.send(envelope.event.clone()).await {
            Ok(()) => {
                shared.stats.sent.fetch_add(1, Ordering::Relaxed);
                shared.release();
            }
            Err(error) => {
                warn!(error = %error, "Failed to write event to collector");
                shared.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                shared.release();
                requeue_once(envelope, &cmd_tx, &shared);
                break;
            }
        }
    }

    // Fail whatever is still queued so the in-flight accounting balances.
    inbox.close();
    while let Ok(envelope) = inbox.try_recv() {
        shared.stats.send_failures.fetch_add(1, Ordering::Relaxed);
        shared.release();
        requeue_once(envelope, &cmd_tx, &shared);
    }
    let _ = cmd_tx.send(Command::ConnectionClosed { generation });
}

/// Collectors never send application data back; any read completing with EOF
/// or an error means the connection is gone.
async fn watch_peer(mut read_half: OwnedReadHalf, cmd_tx: UnboundedSender<Command>, generation: u64) {
    let mut scratch = [0u8; 256];
    loop {
        match read_half.read(&mut scratch).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    debug!(generation, "Collector closed the connection");
    let _ = cmd_tx.send(Command::ConnectionClosed { generation });
}
