use std::sync::Arc;

use tracing::{debug, error, warn};

use super::EventSink;
use crate::broker::{default_address, Broker, BrokerMessage, ProducerSession};
use crate::config::BrokerConfig;
use crate::error::SinkError;
use crate::event::Event;
use crate::filter::EventFilter;

/// Shared, cloneable entry point for producing events.
///
/// Sessions are not thread-safe, so the dispatcher never sends itself: each
/// worker takes its own [`WorkerSink`], which lazily opens and caches one
/// producer session for as long as the worker lives.
#[derive(Clone)]
pub struct EventDispatcher {
    broker: Arc<dyn Broker>,
    filter: Arc<EventFilter>,
    address: String,
    large_message_size: usize,
}

impl EventDispatcher {
    /// Fails with [`SinkError::Startup`] when no producer session can be
    /// opened, so a misconfigured broker is caught at start-up.
    pub fn new(
        broker: Arc<dyn Broker>,
        filter: EventFilter,
        config: &BrokerConfig,
    ) -> Result<Self, SinkError> {
        let mut session = broker.create_producer_session().map_err(SinkError::Startup)?;
        if let Err(err) = session.close() {
            warn!(error = %err, "failed to close start-up producer session");
        }

        Ok(Self {
            broker,
            filter: Arc::new(filter),
            address: default_address(&config.address_prefix),
            large_message_size: config.large_message_size,
        })
    }

    /// The address events are published to.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// A sink for the calling worker.
    pub fn sink(&self) -> WorkerSink {
        WorkerSink {
            dispatcher: self.clone(),
            session: None,
            pending: Vec::new(),
        }
    }

    fn to_message(&self, event: &Event) -> Result<BrokerMessage, SinkError> {
        let payload = event.to_json()?;
        let large = payload.len() > self.large_message_size;
        Ok(BrokerMessage::new(event.id.clone(), payload).with_large(large))
    }
}

/// Per-worker event buffer plus its cached producer session.
pub struct WorkerSink {
    dispatcher: EventDispatcher,
    session: Option<Box<dyn ProducerSession>>,
    pending: Vec<Event>,
}

impl WorkerSink {
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Send on the cached session, opening one first if needed.
    ///
    /// A cached session may belong to a connection the broker has since
    /// dropped, so a failed send on it is retried once on a fresh session.
    /// A session that fails a send is closed and not reused.
    fn publish(&mut self, message: BrokerMessage) -> Result<(), SinkError> {
        if let Some(mut cached) = self.session.take() {
            match cached.send(&self.dispatcher.address, message.clone()) {
                Ok(()) => {
                    self.session = Some(cached);
                    return Ok(());
                }
                Err(err) => {
                    debug!(error = %err, "cached producer session failed, reopening");
                    close_session(cached);
                }
            }
        }

        let mut session = self.dispatcher.broker.create_producer_session()?;
        debug!("opened producer session");
        match session.send(&self.dispatcher.address, message) {
            Ok(()) => {
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                close_session(session);
                Err(err.into())
            }
        }
    }
}

fn close_session(mut session: Box<dyn ProducerSession>) {
    if let Err(err) = session.close() {
        warn!(error = %err, "failed to close producer session");
    }
}

impl EventSink for WorkerSink {
    fn queue_event(&mut self, event: Event) {
        if self.dispatcher.filter.should_filter(&event) {
            debug!(key = %event.filter_key(), event_id = %event.id, "event filtered");
            return;
        }
        self.pending.push(event);
    }

    fn send_events(&mut self) -> usize {
        let events = std::mem::take(&mut self.pending);
        let total = events.len();
        let mut sent = 0;

        for (index, event) in events.into_iter().enumerate() {
            let message = match self.dispatcher.to_message(&event) {
                Ok(message) => message,
                Err(err) => {
                    error!(event_id = %event.id, error = %err, "unable to serialize event");
                    continue;
                }
            };

            if let Err(err) = self.publish(message) {
                error!(
                    event_id = %event.id,
                    dropped = total - index,
                    error = %err,
                    "failed to send events to the broker"
                );
                break;
            }
            sent += 1;
        }

        if sent > 0 {
            debug!(sent, "events sent");
        }
        sent
    }

    fn rollback(&mut self) {
        if !self.pending.is_empty() {
            debug!(discarded = self.pending.len(), "rolling back queued events");
        }
        self.pending.clear();
    }
}

impl Drop for WorkerSink {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.close() {
                warn!(error = %err, "failed to close producer session");
            }
        }
    }
}
