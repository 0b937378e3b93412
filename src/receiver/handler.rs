use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error, warn};

use crate::broker::{BrokerMessage, ConsumerSession};
use crate::error::ListenerError;
use crate::event::Event;
use crate::listeners::EventListener;

/// What happened to one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Listener succeeded and the session was committed.
    Committed,
    /// Listener (or commit) failed; the session was rolled back.
    RolledBack,
    /// The payload could not be decoded. The message stays acknowledged and
    /// is neither committed nor rolled back.
    Discarded,
    /// The listener was not ready; nothing was done to the message.
    Deferred,
    /// The listener hit an external transport failure after the message was
    /// acknowledged; no commit or rollback was issued.
    Held,
}

/// Run one message through the acknowledge / decode / listen / commit cycle.
///
/// `already_acknowledged` is set when retrying a held message so it is not
/// acknowledged twice.
pub fn handle_message(
    session: &mut dyn ConsumerSession,
    listener: &dyn EventListener,
    message: &BrokerMessage,
    already_acknowledged: bool,
) -> Outcome {
    let name = listener.name();

    if let Err(err) = listener.check_ready() {
        debug!(listener = name, message_id = %message.id, error = %err, "listener not ready, deferring message");
        return Outcome::Deferred;
    }

    if !already_acknowledged {
        if let Err(err) = session.acknowledge(message) {
            error!(listener = name, message_id = %message.id, error = %err, "unable to acknowledge message");
            rollback(session, name, &message.id);
            return Outcome::RolledBack;
        }
    }

    let event = match Event::from_json(&message.payload) {
        Ok(event) => event,
        Err(err) => {
            error!(
                listener = name,
                message_id = %message.id,
                body = %String::from_utf8_lossy(&message.payload),
                error = %err,
                "unable to deserialize event, discarding message"
            );
            return Outcome::Discarded;
        }
    };

    let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)))
        .unwrap_or_else(|_| Err(ListenerError::Failed("listener panicked".into())));

    match result {
        Ok(()) => match session.commit() {
            Ok(()) => {
                debug!(listener = name, event_id = %event.id, "event processed");
                Outcome::Committed
            }
            Err(err) => {
                error!(listener = name, event_id = %event.id, error = %err, "commit failed");
                rollback(session, name, &message.id);
                Outcome::RolledBack
            }
        },
        Err(ListenerError::Transport(err)) => {
            warn!(
                listener = name,
                event_id = %event.id,
                error = %err,
                "external transport failure, leaving message untouched"
            );
            Outcome::Held
        }
        Err(err) => {
            error!(
                listener = name,
                event_id = %event.id,
                delivery_count = message.delivery_count,
                error = %err,
                "listener failed, rolling back for redelivery"
            );
            rollback(session, name, &message.id);
            Outcome::RolledBack
        }
    }
}

fn rollback(session: &mut dyn ConsumerSession, listener: &str, message_id: &str) {
    if let Err(err) = session.rollback() {
        error!(listener, message_id, error = %err, "rollback failed");
    }
}
