//! End-to-end tests for the resilient appender against a live in-process
//! TCP collector.
//!
//! The collector accepts one connection at a time (the appender only holds
//! one), splits the byte stream on NUL delimiters, and records every decoded
//! frame. Tests can drop the current connection or take the whole listener
//! down and bring it back to exercise the reconnect machinery.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use gelfkit::{
    configure_logging, ConsoleAppender, GelfAppender, GelfConfig, GelfError, Level, LogEvent,
    Pipeline, Stage, ThresholdFilter,
};

// ============================================================================
// Wire format
// ============================================================================

#[tokio::test]
async fn test_delivers_gelf_frame_while_connected() {
    let collector = Collector::start().await;
    let config = test_config(collector.addr)
        .with_additional_field("environment", "staging")
        .with_additional_field("region", "eu-1");
    let appender = GelfAppender::new(config);
    appender.start().await.unwrap();

    let timestamp = chrono::DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
    let event = LogEvent::new(Level::Info, "checkout ready")
        .with_timestamp(timestamp)
        .with_field("port", 8443i32)
        .with_field("region", "eu-2");
    appender.process(event);

    wait_until("first frame", || collector.frame_count() == 1).await;
    let frame = collector.frames()[0].clone();

    assert_eq!(frame["version"], "1.1");
    assert_eq!(frame["host"], "it-tests");
    assert_eq!(frame["timestamp"].as_f64(), Some(1_700_000_000.25));
    assert_eq!(frame["level"].as_i64(), Some(6));
    assert_eq!(frame["short_message"], "checkout ready");
    assert_eq!(frame["_facility"], "integration");
    assert_eq!(frame["_environment"], "staging");
    assert_eq!(frame["_port"].as_i64(), Some(8443));
    // The event's own field wins the collision with the static one.
    assert_eq!(frame["_region"], "eu-2");

    appender.stop().await;
    assert_eq!(appender.stats().sent, 1);
}

#[tokio::test]
async fn test_process_passes_event_through_unchanged() {
    let collector = Collector::start().await;
    let appender = GelfAppender::new(test_config(collector.addr));
    appender.start().await.unwrap();

    // A second start on the same appender must refuse.
    assert!(matches!(
        appender.start().await,
        Err(GelfError::AlreadyStarted)
    ));

    let event = LogEvent::new(Level::Warn, "disk filling").with_field("free_gb", 12i32);
    let out = appender.process(event.clone()).unwrap();
    assert_eq!(out.short_message, event.short_message);
    assert_eq!(out.fields, event.fields);

    appender.stop().await;

    // After stop the stage still passes events through; they just go nowhere.
    let late = appender.process(make_event("too late"));
    assert!(late.is_some());
}

// ============================================================================
// Disconnection, buffering, reconnect
// ============================================================================

#[tokio::test]
async fn test_buffers_while_disconnected_and_flushes_fifo_on_reconnect() {
    init_tracing();
    let collector = Collector::start().await;
    let config = test_config(collector.addr).with_reconnect_delay(Duration::from_millis(300));
    let appender = GelfAppender::new(config);
    appender.start().await.unwrap();
    assert!(appender.is_connected());

    collector.drop_connection();
    wait_until("disconnect noticed", || !appender.is_connected()).await;

    // Everything sent now has nowhere to go but the buffer.
    for n in 0..5 {
        appender.process(make_event(&format!("buffered-{n}")));
    }
    wait_until("events buffered", || appender.stats().buffered == 5).await;
    assert_eq!(collector.frame_count(), 0);

    // The fixed-delay reconnect kicks in and the buffer flushes oldest-first.
    wait_until("reconnected", || collector.accepted() == 2).await;
    wait_until("buffer flushed", || collector.frame_count() == 5).await;
    let messages: Vec<String> = collector
        .frames()
        .iter()
        .map(|f| f["short_message"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        messages,
        vec![
            "buffered-0",
            "buffered-1",
            "buffered-2",
            "buffered-3",
            "buffered-4"
        ]
    );

    // New arrivals land behind the flushed backlog.
    appender.process(make_event("after-reconnect"));
    wait_until("new arrival delivered", || collector.frame_count() == 6).await;
    assert_eq!(collector.frames()[5]["short_message"], "after-reconnect");

    let stats = appender.stats();
    assert_eq!(stats.disconnects, 1);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.buffered, 0);

    appender.stop().await;
}

#[tokio::test]
async fn test_full_buffer_drops_newest_events() {
    let collector = Collector::start().await;
    let config = test_config(collector.addr)
        .with_buffer_capacity(3)
        .with_reconnect_delay(Duration::from_millis(300));
    let appender = GelfAppender::new(config);
    appender.start().await.unwrap();

    collector.drop_connection();
    wait_until("disconnect noticed", || !appender.is_connected()).await;

    for n in 0..5 {
        appender.process(make_event(&format!("overflow-{n}")));
    }
    wait_until("overflow counted", || appender.stats().dropped_buffer == 2).await;
    assert_eq!(appender.stats().buffered, 3);

    // Only the three oldest survive to the flush.
    wait_until("survivors flushed", || collector.frame_count() == 3).await;
    let messages: Vec<String> = collector
        .frames()
        .iter()
        .map(|f| f["short_message"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(messages, vec!["overflow-0", "overflow-1", "overflow-2"]);

    appender.stop().await;
}

#[tokio::test]
async fn test_reconnect_keeps_retrying_through_collector_outage() {
    init_tracing();
    let collector = Collector::start().await;
    let appender = GelfAppender::new(test_config(collector.addr));
    appender.start().await.unwrap();

    // Take the whole listener down: the drop is noticed, and every
    // reconnect attempt fails until the collector comes back.
    collector.shutdown();
    wait_until("disconnect noticed", || appender.stats().disconnects == 1).await;
    wait_until("failed attempts recorded", || {
        appender.stats().reconnect_failures >= 1
    })
    .await;
    assert!(!appender.is_connected());

    collector.restart().await;
    wait_until("reconnected", || appender.is_connected()).await;
    wait_until("second accept", || collector.accepted() == 2).await;

    appender.process(make_event("back in business"));
    wait_until("delivered after outage", || collector.frame_count() == 1).await;

    appender.stop().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_stop_waits_for_in_flight_writes() {
    let collector = Collector::start().await;
    let appender = GelfAppender::new(test_config(collector.addr));
    appender.start().await.unwrap();

    for n in 0..20 {
        appender.process(make_event(&format!("drain-{n}")));
    }

    // Stop is requested while writes are still in flight; it must block
    // until every one of them completes, then close.
    timeout(Duration::from_secs(5), appender.stop())
        .await
        .expect("stop should complete once in-flight writes drain");
    assert_eq!(appender.stats().sent, 20);
    assert_eq!(appender.stats().in_flight, 0);

    wait_until("all frames observed", || collector.frame_count() == 20).await;
}

#[tokio::test]
async fn test_stop_discards_buffered_events() {
    let collector = Collector::start().await;
    let config = test_config(collector.addr).with_reconnect_delay(Duration::from_secs(60));
    let appender = GelfAppender::new(config);
    appender.start().await.unwrap();

    collector.drop_connection();
    wait_until("disconnect noticed", || !appender.is_connected()).await;

    for n in 0..4 {
        appender.process(make_event(&format!("doomed-{n}")));
    }
    wait_until("events buffered", || appender.stats().buffered == 4).await;

    // Nothing is in flight, so stop returns promptly and the buffer is gone.
    timeout(Duration::from_secs(1), appender.stop())
        .await
        .expect("stop with an idle connection should not block");

    assert_eq!(collector.frame_count(), 0);
    let stats = appender.stats();
    assert_eq!(stats.buffered, 0);
    assert_eq!(stats.sent, 0);
}

// ============================================================================
// Startup failure
// ============================================================================

#[tokio::test]
async fn test_start_fails_when_collector_unreachable_then_recovers() {
    // Reserve a port, then free it so the first attempt is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let appender = GelfAppender::new(test_config(addr));
    let err = appender.start().await.unwrap_err();
    assert!(matches!(err, GelfError::Connect { .. }));
    assert!(!appender.is_connected());

    // A failed start leaves the appender startable; bring the collector up
    // on the same port and try again.
    let collector = Collector::bind(addr).await;
    appender.start().await.unwrap();
    assert!(appender.is_connected());

    appender.process(make_event("second try"));
    wait_until("frame after recovery", || collector.frame_count() == 1).await;
    appender.stop().await;
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test]
async fn test_zero_in_flight_cap_drops_every_send() {
    let collector = Collector::start().await;
    let config = test_config(collector.addr).with_max_in_flight(0);
    let appender = GelfAppender::new(config);
    appender.start().await.unwrap();

    for n in 0..3 {
        appender.process(make_event(&format!("capped-{n}")));
    }
    wait_until("drops counted", || appender.stats().dropped_in_flight == 3).await;
    assert_eq!(appender.stats().in_flight, 0);
    assert_eq!(collector.frame_count(), 0);

    // Nothing in flight means stop cannot block.
    timeout(Duration::from_secs(1), appender.stop())
        .await
        .expect("stop should be immediate with nothing in flight");
}

// ============================================================================
// Pipeline composition
// ============================================================================

#[tokio::test]
async fn test_threshold_appender_console_pipeline() {
    let collector = Collector::start().await;
    let appender = GelfAppender::new(test_config(collector.addr));
    appender.start().await.unwrap();

    let pipeline = Pipeline::from_stage(ThresholdFilter::new(Level::Info))
        .then(appender.clone())
        .then(ConsoleAppender::new());

    // Below threshold: filtered before the appender sees it.
    assert!(pipeline.process(LogEvent::new(Level::Debug, "chatty")).is_none());
    // At threshold: delivered and passed through to the console.
    assert!(pipeline
        .process(LogEvent::new(Level::Info, "worth shipping"))
        .is_some());

    wait_until("only the info frame", || collector.frame_count() == 1).await;
    assert_eq!(collector.frames()[0]["short_message"], "worth shipping");
    assert_eq!(appender.stats().sent, 1);

    appender.stop().await;
}

#[tokio::test]
async fn test_logger_ships_through_global_pipeline() {
    let collector = Collector::start().await;
    let appender = GelfAppender::new(test_config(collector.addr));
    appender.start().await.unwrap();

    // The global logger is configured once per process; this is the only
    // test that touches it.
    let log = configure_logging(
        Pipeline::from_stage(ThresholdFilter::new(Level::Info)).then(appender.clone()),
    );

    log.debug("filtered out");
    log.warn("shipped");

    wait_until("one frame via logger", || collector.frame_count() == 1).await;
    let frame = collector.frames()[0].clone();
    assert_eq!(frame["short_message"], "shipped");
    assert_eq!(frame["level"].as_i64(), Some(5));

    appender.stop().await;
}

// ============================================================================
// Test collector
// ============================================================================

struct Collector {
    addr: SocketAddr,
    frames: Arc<Mutex<Vec<serde_json::Value>>>,
    accepted: Arc<AtomicUsize>,
    kill: Arc<Notify>,
    halt: Arc<Notify>,
}

impl Collector {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::from_listener(listener)
    }

    async fn bind(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::from_listener(listener)
    }

    fn from_listener(listener: TcpListener) -> Self {
        let collector = Self {
            addr: listener.local_addr().unwrap(),
            frames: Arc::new(Mutex::new(Vec::new())),
            accepted: Arc::new(AtomicUsize::new(0)),
            kill: Arc::new(Notify::new()),
            halt: Arc::new(Notify::new()),
        };
        collector.spawn_accept_loop(listener);
        collector
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let frames = Arc::clone(&self.frames);
        let accepted = Arc::clone(&self.accepted);
        let kill = Arc::clone(&self.kill);
        let halt = Arc::clone(&self.halt);
        tokio::spawn(async move {
            loop {
                let sock = tokio::select! {
                    result = listener.accept() => match result {
                        Ok((sock, _)) => sock,
                        Err(_) => return,
                    },
                    _ = halt.notified() => return,
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                read_frames(sock, &frames, &kill).await;
            }
        });
    }

    fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    fn frames(&self) -> Vec<serde_json::Value> {
        self.frames.lock().clone()
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Drop the current connection; the listener keeps accepting.
    fn drop_connection(&self) {
        self.kill.notify_one();
    }

    /// Drop the connection and stop accepting, freeing the port. The kill
    /// permit is consumed by the live connection.
    fn shutdown(&self) {
        self.kill.notify_one();
        self.halt.notify_one();
    }

    /// Bring the listener back on the same port after [`Collector::shutdown`].
    async fn restart(&self) {
        let listener = TcpListener::bind(self.addr).await.unwrap();
        self.spawn_accept_loop(listener);
    }
}

/// Read one connection until it closes or the kill signal fires, splitting
/// the stream on NUL delimiters.
async fn read_frames(mut sock: TcpStream, frames: &Mutex<Vec<serde_json::Value>>, kill: &Notify) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        tokio::select! {
            read = sock.read(&mut chunk) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(end) = pending.iter().position(|&b| b == 0) {
                        let frame: serde_json::Value =
                            serde_json::from_slice(&pending[..end]).unwrap();
                        frames.lock().push(frame);
                        pending.drain(..=end);
                    }
                }
            },
            _ = kill.notified() => return,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config(addr: SocketAddr) -> GelfConfig {
    GelfConfig::new(addr.ip().to_string())
        .with_port(addr.port())
        .with_sender_host("it-tests")
        .with_facility("integration")
        .with_reconnect_delay(Duration::from_millis(50))
}

fn make_event(message: &str) -> LogEvent {
    LogEvent::new(Level::Info, message)
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let result = timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {what}");
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}
