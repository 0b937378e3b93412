//! Error types shared across the event distribution layer.

use thiserror::Error;

/// Errors raised by an internal broker implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker cannot be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    /// The session was already closed.
    #[error("session closed")]
    SessionClosed,
    /// The queue already exists. Callers creating durable queues treat this as success.
    #[error("queue already exists: {0}")]
    QueueExists(String),
    /// No queue bound to the given address.
    #[error("no such queue: {0}")]
    NoSuchQueue(String),
    /// An internal lock was poisoned by a panicking thread.
    #[error("broker lock poisoned during {0}")]
    LockPoisoned(&'static str),
    /// Any other broker-side failure.
    #[error("broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// The session this error came from can never be used again; a new one
    /// must be opened.
    pub fn is_session_lost(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_) | BrokerError::SessionClosed)
    }
}

/// Errors raised while producing events.
///
/// Only [`SinkError::Startup`] ever leaves the sink; the others are logged and
/// swallowed at the sink boundary.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The initial producer session could not be established.
    #[error("unable to create the initial producer session: {0}")]
    Startup(#[source] BrokerError),
    /// The event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The broker rejected or could not accept the message.
    #[error("send failed: {0}")]
    Send(#[from] BrokerError),
}

/// Errors returned by [`crate::listeners::EventListener`] implementations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Forwarding to the external bus failed at the transport level.
    ///
    /// The receiver leaves the internal message untouched for this kind.
    #[error("external transport failure: {0}")]
    Transport(#[source] BusError),
    /// The listener could not process the event. Triggers redelivery.
    #[error("listener failed: {0}")]
    Failed(String),
    /// Any other error from a listener implementation.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<BusError> for ListenerError {
    fn from(err: BusError) -> Self {
        ListenerError::Transport(err)
    }
}

/// Errors raised by the external bus connector.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No connection to the external bus exists.
    #[error("not connected to the external bus")]
    NotConnected,
    /// The external bus signalled flow control; sends fail fast.
    #[error("external bus flow stopped")]
    FlowStopped,
    /// The transport failed while connecting or sending.
    #[error("external bus transport error: {0}")]
    Transport(String),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment could not extract the configuration.
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    /// A value failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

/// Top-level error for start-up and wiring.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("unknown listener: {0}")]
    UnknownListener(String),
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_converts_to_transport_listener_error() {
        let err: ListenerError = BusError::FlowStopped.into();
        assert!(matches!(err, ListenerError::Transport(BusError::FlowStopped)));
        assert_eq!(
            err.to_string(),
            "external transport failure: external bus flow stopped"
        );
    }

    #[test]
    fn startup_error_keeps_source() {
        let err = SinkError::Startup(BrokerError::Unavailable("vm://0".into()));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("broker unavailable: vm://0"));
    }
}
