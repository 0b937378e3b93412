//! Event sink - the producing side of the event layer.
//!
//! Request handlers queue events while they work and flush them once their
//! own transaction has committed:
//!
//! ```
//! use std::sync::Arc;
//! use audit_bus::broker::InMemoryBroker;
//! use audit_bus::config::BrokerConfig;
//! use audit_bus::event::{Event, EventType, Target};
//! use audit_bus::filter::EventFilter;
//! use audit_bus::sink::{EventDispatcher, EventSink};
//!
//! let broker = InMemoryBroker::new();
//! let dispatcher =
//!     EventDispatcher::new(Arc::new(broker.clone()), EventFilter::disabled(), &BrokerConfig::default())
//!         .unwrap();
//!
//! let mut sink = dispatcher.sink();
//! sink.queue_event(Event::builder(EventType::Created, Target::Consumer).owner_id("o1").build());
//! assert_eq!(sink.send_events(), 1);
//! assert_eq!(broker.published("event.default").len(), 1);
//! ```

mod dispatcher;
mod noop;

use crate::event::Event;

pub use dispatcher::{EventDispatcher, WorkerSink};
pub use noop::NoopEventSink;

/// Collects events during a unit of work and publishes them afterwards.
pub trait EventSink: Send {
    /// Buffer an event, unless the filter drops it.
    fn queue_event(&mut self, event: Event);

    /// Publish every buffered event. Failures are logged, never returned.
    /// Returns how many events were handed to the broker.
    fn send_events(&mut self) -> usize;

    /// Discard every buffered event.
    fn rollback(&mut self);
}
