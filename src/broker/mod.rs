//! Internal broker abstraction.
//!
//! The event layer talks to its durable broker only through these traits, so
//! any client library (or the bundled [`InMemoryBroker`]) can sit underneath.
//!
//! ## Model
//!
//! ```text
//!  ProducerSession ──send──▶ address "event.default"
//!                                  │ (fan-out to every bound queue)
//!              ┌───────────────────┼────────────────────┐
//!              ▼                   ▼                    ▼
//!   queue "event.LoggingListener"  queue "event.ActivationListener" ...
//!              │
//!              ▼
//!   ConsumerSession (transactional: acknowledge / commit / rollback)
//! ```
//!
//! Sessions are not thread-safe by contract: each one is owned by exactly one
//! worker or consumer thread, hence `Send` but not `Sync`.

mod in_memory;

use std::time::Duration;

use crate::error::BrokerError;

pub use in_memory::InMemoryBroker;

/// A message as stored in and delivered by the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerMessage {
    /// Producer-assigned identifier (the event id).
    pub id: String,
    /// JSON payload.
    pub payload: Vec<u8>,
    /// How many times this message was delivered before and rolled back.
    pub delivery_count: u32,
    /// Set when the payload exceeds the large-message threshold; the broker
    /// may page such messages to disk.
    pub large: bool,
}

impl BrokerMessage {
    pub fn new(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            delivery_count: 0,
            large: false,
        }
    }

    pub fn with_large(mut self, large: bool) -> Self {
        self.large = large;
        self
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Connection-level handle to the internal broker.
///
/// Implementations are shared between the sink, the message source and the
/// status monitor, so they must be `Send + Sync`.
pub trait Broker: Send + Sync {
    /// Open a new producer session.
    fn create_producer_session(&self) -> Result<Box<dyn ProducerSession>, BrokerError>;

    /// Open a transactional consumer session on an existing queue.
    fn create_consumer_session(&self, queue: &str)
        -> Result<Box<dyn ConsumerSession>, BrokerError>;

    /// Create a durable queue bound to `address`.
    ///
    /// Returns [`BrokerError::QueueExists`] when the queue is already there;
    /// use [`ensure_queue`] for create-if-absent semantics.
    fn create_queue(&self, address: &str, queue: &str) -> Result<(), BrokerError>;

    /// Identifies the current underlying transport. Changes whenever the
    /// transport object is replaced (e.g. after a broker restart).
    fn connection_epoch(&self) -> u64 {
        0
    }

    /// Close the broker connection / session factory.
    fn close(&self) -> Result<(), BrokerError>;
}

/// A producer session plus producer. Owned by a single worker.
pub trait ProducerSession: Send {
    fn send(&mut self, address: &str, message: BrokerMessage) -> Result<(), BrokerError>;

    fn close(&mut self) -> Result<(), BrokerError>;
}

/// A transactional consumer session bound to one queue.
pub trait ConsumerSession: Send {
    /// Start delivery.
    fn start(&mut self) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message.
    fn receive(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError>;

    /// Mark the message delivered (updates redelivery bookkeeping).
    fn acknowledge(&mut self, message: &BrokerMessage) -> Result<(), BrokerError>;

    /// Remove every acknowledged message of this transaction from the queue.
    fn commit(&mut self) -> Result<(), BrokerError>;

    /// Return every message of this transaction to the queue for redelivery.
    fn rollback(&mut self) -> Result<(), BrokerError>;

    /// Stop delivery without closing.
    fn stop(&mut self) -> Result<(), BrokerError>;

    /// Close the session. Uncommitted messages return to the queue.
    fn close(&mut self) -> Result<(), BrokerError>;

    fn is_closed(&self) -> bool;
}

/// Create `queue` on `address` unless it already exists.
pub fn ensure_queue(broker: &dyn Broker, address: &str, queue: &str) -> Result<(), BrokerError> {
    match broker.create_queue(address, queue) {
        Ok(()) => Ok(()),
        Err(BrokerError::QueueExists(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

/// The address every event is published to: `<prefix>.default`.
pub fn default_address(prefix: &str) -> String {
    format!("{}.default", prefix)
}

/// The durable queue for one listener: `<prefix>.<listener name>`.
pub fn queue_name(prefix: &str, listener: &str) -> String {
    format!("{}.{}", prefix, listener)
}
