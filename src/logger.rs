//! Logger facade: level-tagged convenience calls feeding a pipeline.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::console::ConsoleAppender;
use crate::event::{Level, LogEvent};
use crate::pipeline::Pipeline;

/// Builds events and pushes them into a pipeline. Cheap to clone.
///
/// Field-carrying events are built with the [`LogEvent`] builder and handed
/// to [`Logger::log`]; the per-level methods cover the plain-message case.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Fn(LogEvent) + Send + Sync>,
}

impl Logger {
    /// Wrap a pipeline. Its output type is erased; only the side effects of
    /// its stages matter from here on.
    pub fn new<O: 'static>(pipeline: Pipeline<LogEvent, O>) -> Self {
        Self {
            sink: Arc::new(move |event| {
                let _ = pipeline.process(event);
            }),
        }
    }

    /// Feed one pre-built event through the pipeline.
    pub fn log(&self, event: LogEvent) {
        (self.sink)(event);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogEvent::new(Level::Debug, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogEvent::new(Level::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogEvent::new(Level::Warn, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogEvent::new(Level::Error, message));
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogEvent::new(Level::Fatal, message));
    }
}

static ROOT: OnceLock<Logger> = OnceLock::new();

/// Install the process-wide logger pipeline.
///
/// The first call wins; later calls keep the existing pipeline and get the
/// installed logger back.
pub fn configure_logging<O: 'static>(pipeline: Pipeline<LogEvent, O>) -> &'static Logger {
    let mut installed = false;
    let logger = ROOT.get_or_init(|| {
        installed = true;
        Logger::new(pipeline)
    });
    if !installed {
        debug!("Logging already configured, keeping the existing pipeline");
    }
    logger
}

/// The process-wide logger. Prints to the console until
/// [`configure_logging`] installs a real pipeline.
pub fn logger() -> &'static Logger {
    ROOT.get_or_init(|| Logger::new(Pipeline::from_stage(ConsoleAppender::new())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn capturing_pipeline() -> (Pipeline<LogEvent, LogEvent>, Arc<Mutex<Vec<LogEvent>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let pipeline = Pipeline::new(move |event: LogEvent| {
            sink.lock().push(event.clone());
            Some(event)
        });
        (pipeline, captured)
    }

    #[test]
    fn test_convenience_methods_set_levels() {
        let (pipeline, captured) = capturing_pipeline();
        let logger = Logger::new(pipeline);

        logger.debug("d");
        logger.info("i");
        logger.warn("w");
        logger.error("e");
        logger.fatal("f");

        let events = captured.lock();
        let levels: Vec<Level> = events.iter().map(|e| e.level).collect();
        assert_eq!(
            levels,
            vec![
                Level::Debug,
                Level::Info,
                Level::Warn,
                Level::Error,
                Level::Fatal
            ]
        );
        assert_eq!(events[1].short_message, "i");
        assert!(events[1].fields.is_empty());
    }

    #[test]
    fn test_log_passes_built_event_through() {
        let (pipeline, captured) = capturing_pipeline();
        let logger = Logger::new(pipeline);

        logger.log(LogEvent::new(Level::Info, "deploy").with_field("version", "1.4.2"));

        let events = captured.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].fields.get("version"),
            Some(&crate::event::Value::Text("1.4.2".to_string()))
        );
    }

    // Global state: everything about the process-wide logger lives in one
    // test so nothing races on the OnceLock.
    #[test]
    fn test_global_configuration_is_first_call_wins() {
        let (pipeline, captured) = capturing_pipeline();
        let configured = configure_logging(pipeline);

        logger().info("through the global");
        assert_eq!(captured.lock().len(), 1);

        // A second configure keeps the first pipeline.
        let (other, other_captured) = capturing_pipeline();
        let again = configure_logging(other);
        again.info("still the first pipeline");

        assert_eq!(captured.lock().len(), 2);
        assert!(other_captured.lock().is_empty());
        assert!(std::ptr::eq(configured, again));
    }
}
