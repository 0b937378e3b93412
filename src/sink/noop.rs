use tracing::trace;

use super::EventSink;
use crate::event::Event;

/// Used when the internal broker is disabled: every event is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn queue_event(&mut self, event: Event) {
        trace!(event_id = %event.id, "broker disabled, discarding event");
    }

    fn send_events(&mut self) -> usize {
        0
    }

    fn rollback(&mut self) {}
}
