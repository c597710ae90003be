//! Bounded FIFO holding events that arrive while the collector is
//! unreachable.

use std::collections::VecDeque;

use crate::event::LogEvent;

/// Events in arrival order, up to a fixed capacity.
///
/// When full, `push` rejects the incoming event; events already buffered are
/// never evicted.
pub(crate) struct PendingBuffer {
    events: VecDeque<LogEvent>,
    capacity: usize,
}

impl PendingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
        }
    }

    /// Append one event. Returns `false` (and keeps nothing) when full.
    pub(crate) fn push(&mut self, event: LogEvent) -> bool {
        if self.events.len() >= self.capacity {
            return false;
        }
        self.events.push_back(event);
        true
    }

    /// Remove and return the oldest event.
    pub(crate) fn pop(&mut self) -> Option<LogEvent> {
        self.events.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
