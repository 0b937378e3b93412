//! Connector to the external message bus.
//!
//! Events selected for integration partners are republished to an external
//! bus at `<target>.<type>` destinations (e.g. `consumer.created`). The
//! connector follows the bus's health the same way the message source
//! follows the internal broker, with one extra state: the bus may stay
//! connected but signal flow control, during which sends fail fast.

mod connector;
mod in_memory;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

pub use connector::ExternalBusConnector;
pub use in_memory::InMemoryBus;

/// Status of the external bus connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusStatus {
    #[default]
    Unknown,
    Down,
    Connected,
    /// Connected, but the bus refuses new messages.
    FlowStopped,
}

/// The connector's reaction to a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    /// Open a connection and start with an empty producer cache.
    Connect,
    /// Close the connection and drop every cached producer.
    Disconnect,
    /// Keep the connection; fail sends until flow resumes.
    StopFlow,
    /// Keep the connection; accept sends again.
    ResumeFlow,
    None,
}

/// Pure transition table for the connector.
pub fn transition(old: BusStatus, new: BusStatus) -> BusAction {
    use BusStatus::*;

    match (old, new) {
        (_, Down) => BusAction::Disconnect,
        (Unknown | Down, Connected) => BusAction::Connect,
        (FlowStopped, Connected) => BusAction::ResumeFlow,
        (_, FlowStopped) if old != FlowStopped => BusAction::StopFlow,
        _ => BusAction::None,
    }
}

/// Opens connections to the external bus.
pub trait BusTransport: Send + Sync {
    fn connect(&self) -> Result<Box<dyn BusConnection>, BusError>;
}

/// A live connection. Owned by the connector.
pub trait BusConnection: Send {
    fn create_producer(&mut self, destination: &str) -> Result<Box<dyn BusProducer>, BusError>;

    fn close(&mut self) -> Result<(), BusError>;
}

/// Sends to one destination.
pub trait BusProducer: Send {
    fn send(&mut self, payload: &[u8]) -> Result<(), BusError>;
}

/// `<target>.<type>` in lower case.
pub fn destination(target: &str, event_type: &str) -> String {
    format!("{}.{}", target, event_type).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use BusStatus::*;

    const ALL: [BusStatus; 4] = [Unknown, Down, Connected, FlowStopped];

    #[test]
    fn every_transition_to_down_disconnects() {
        for old in ALL {
            assert_eq!(transition(old, Down), BusAction::Disconnect, "{:?} -> Down", old);
        }
    }

    #[test]
    fn full_transition_table() {
        let expected = [
            (Unknown, Connected, BusAction::Connect),
            (Down, Connected, BusAction::Connect),
            (Connected, Connected, BusAction::None),
            (FlowStopped, Connected, BusAction::ResumeFlow),
            (Unknown, FlowStopped, BusAction::StopFlow),
            (Down, FlowStopped, BusAction::StopFlow),
            (Connected, FlowStopped, BusAction::StopFlow),
            (FlowStopped, FlowStopped, BusAction::None),
            (Unknown, Unknown, BusAction::None),
            (Down, Unknown, BusAction::None),
            (Connected, Unknown, BusAction::None),
            (FlowStopped, Unknown, BusAction::None),
        ];
        for (old, new, action) in expected {
            assert_eq!(transition(old, new), action, "{:?} -> {:?}", old, new);
        }
    }

    #[test]
    fn destinations_are_lower_case() {
        assert_eq!(destination("CONSUMER", "CREATED"), "consumer.created");
        assert_eq!(destination("ACTIVATIONKEY", "DELETED"), "activationkey.deleted");
    }
}
