//! The Event Emitter: a bounded, ordered queue of [`AgentEvent`]
//! consumed by the renderer once per frame.

use std::collections::VecDeque;

use smithers_types::AgentEvent;

const DEFAULT_CAPACITY: usize = 1024;

/// Bounded ring of events. Once full, further events are dropped and
/// counted rather than evicting what's already queued - a slow renderer
/// loses the newest events, not the oldest ones it hasn't seen yet.
pub struct EventEmitter {
    capacity: usize,
    queue: VecDeque<AgentEvent>,
    dropped: u32,
    overflow_reported: bool,
}

impl EventEmitter {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity),
            dropped: 0,
            overflow_reported: false,
        }
    }

    pub fn emit(&mut self, event: AgentEvent) {
        if self.queue.len() < self.capacity {
            self.queue.push_back(event);
            return;
        }

        self.dropped += 1;
        if !self.overflow_reported {
            // Make room for the one notice the renderer must see by
            // evicting the oldest queued event.
            self.queue.pop_front();
            self.queue.push_back(AgentEvent::AgentError {
                message: "event queue overflow".to_string(),
            });
            self.overflow_reported = true;
        }
    }

    /// Drain every queued event in order, resetting the overflow window.
    pub fn drain(&mut self) -> Vec<AgentEvent> {
        self.overflow_reported = false;
        self.dropped = 0;
        self.queue.drain(..).collect()
    }

    #[must_use]
    pub fn dropped_count(&self) -> u32 {
        self.dropped
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_events_in_order() {
        let mut emitter = EventEmitter::new(8);
        emitter.emit(AgentEvent::AgentStart);
        emitter.emit(AgentEvent::TurnStart { turn_no: 1 });
        let drained = emitter.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], AgentEvent::AgentStart));
        assert!(matches!(drained[1], AgentEvent::TurnStart { turn_no: 1 }));
    }

    #[test]
    fn overflow_is_counted_and_reported_once_per_window() {
        let mut emitter = EventEmitter::new(2);
        emitter.emit(AgentEvent::AgentStart);
        emitter.emit(AgentEvent::AgentStart);
        emitter.emit(AgentEvent::AgentStart); // first overflow
        emitter.emit(AgentEvent::AgentStart); // second overflow, not separately reported

        assert_eq!(emitter.dropped_count(), 2);
        let drained = emitter.drain();
        assert!(matches!(drained.last(), Some(AgentEvent::AgentError { .. })));
        let overflow_notices = drained.iter().filter(|e| matches!(e, AgentEvent::AgentError { .. })).count();
        assert_eq!(overflow_notices, 1);
    }

    #[test]
    fn drain_resets_the_overflow_window() {
        let mut emitter = EventEmitter::new(1);
        emitter.emit(AgentEvent::AgentStart);
        emitter.emit(AgentEvent::AgentStart);
        assert_eq!(emitter.dropped_count(), 1);
        emitter.drain();
        assert_eq!(emitter.dropped_count(), 0);

        emitter.emit(AgentEvent::AgentStart);
        emitter.emit(AgentEvent::AgentStart);
        assert_eq!(emitter.dropped_count(), 1);
    }
}
