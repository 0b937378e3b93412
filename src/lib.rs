//! Reliable distribution of audit-worthy domain events.
//!
//! Events are buffered per unit of work by an [`EventSink`], published to a
//! durable internal broker once the work commits, and fanned out to one
//! durable queue per [`EventListener`]. Each listener consumes its queue
//! transactionally, so a failing listener redelivers without affecting the
//! others. Selected events can be forwarded to an external message bus.
//!
//! Both connections are watched by a [`StatusMonitor`]; receivers and the
//! external bus connector reconnect and disconnect as the status changes.

pub mod broker;
pub mod config;
pub mod context;
mod error;
pub mod event;
pub mod external;
pub mod filter;
pub mod listeners;
pub mod logging;
pub mod receiver;
pub mod sink;
pub mod source;
pub mod status;

pub use broker::{Broker, BrokerMessage, ConsumerSession, InMemoryBroker, ProducerSession};
pub use config::{Config, ConfigLoader};
pub use context::{EventSystem, EventSystemBuilder};
pub use error::{BrokerError, BusError, ConfigError, Error, ListenerError, Result, SinkError};
pub use event::{Event, EventBuilder, EventType, Target};
pub use external::{BusStatus, ExternalBusConnector, InMemoryBus};
pub use filter::{EventFilter, FilterConfig, FilterPolicy};
pub use listeners::EventListener;
pub use receiver::MessageReceiver;
pub use sink::{EventDispatcher, EventSink, NoopEventSink};
pub use source::MessageSource;
pub use status::{ConnectionStatus, ConnectionStatusListener, StatusMonitor};
