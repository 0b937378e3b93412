//! Event listeners - the in-process consumers of the internal broker.
//!
//! Each listener gets its own durable queue and receiver. The bundled
//! listeners cover the audit log ([`LoggingListener`]), activation emails
//! ([`ActivationListener`]), HMAC-signed webhooks (`WebhookListener`, behind
//! the `webhook` feature) and forwarding to the external bus
//! ([`BusForwardingListener`]).

mod activation;
mod bus_forwarding;
mod logging;
mod registry;
#[cfg(feature = "webhook")]
mod webhook;

use crate::error::ListenerError;
use crate::event::Event;

pub use activation::{ActivationListener, LoggingSubscriptionService, SubscriptionService};
pub use bus_forwarding::BusForwardingListener;
pub use logging::LoggingListener;
pub use registry::{build_listener, ListenerContext, KNOWN_LISTENERS};
#[cfg(feature = "webhook")]
pub use webhook::{sign, WebhookListener, SIGNATURE_HEADER};

/// Something that reacts to events delivered from its durable queue.
///
/// Returning an error rolls the message back for redelivery, except for
/// [`ListenerError::Transport`], which leaves the message untouched.
pub trait EventListener: Send + Sync {
    /// Stable, fully-qualified name. Determines the listener's queue, so it
    /// must not change between releases.
    fn name(&self) -> &str;

    fn on_event(&self, event: &Event) -> Result<(), ListenerError>;

    /// Checked before a message is acknowledged. An error here means the
    /// listener cannot currently make progress (e.g. its downstream transport
    /// is down) and the message is held without being acknowledged.
    fn check_ready(&self) -> Result<(), ListenerError> {
        Ok(())
    }
}
