//! Per-listener message receivers.
//!
//! A [`MessageReceiver`] binds one [`EventListener`] to its own durable queue
//! (`<prefix>.<listener name>`, bound to `<prefix>.default`). While connected
//! it runs a consumption thread that handles each message in its own
//! transaction:
//!
//! 1. if the listener reports it is not ready, the message is held without
//!    being acknowledged and the receiver pauses
//! 2. acknowledge
//! 3. decode the event; undecodable payloads are logged and left acknowledged
//! 4. invoke the listener
//! 5. commit on success, roll back on failure; an external transport failure
//!    pauses the receiver with neither

mod handler;
mod thread;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broker::{default_address, ensure_queue, queue_name, Broker};
use crate::error::BrokerError;
use crate::listeners::EventListener;

pub use handler::{handle_message, Outcome};
pub use thread::ReceiverStats;

use thread::ConsumerThread;

/// Consumes one listener's queue.
pub struct MessageReceiver {
    listener: Arc<dyn EventListener>,
    address: String,
    queue: String,
    poll_interval: Duration,
    paused: Arc<AtomicBool>,
    worker: Option<ConsumerThread>,
}

impl MessageReceiver {
    pub fn new(listener: Arc<dyn EventListener>, prefix: &str, poll_interval: Duration) -> Self {
        let queue = queue_name(prefix, listener.name());
        Self {
            listener,
            address: default_address(prefix),
            queue,
            poll_interval,
            paused: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn listener_name(&self) -> &str {
        self.listener.name()
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// `true` while a consumption thread is running.
    pub fn is_connected(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// `true` while a message is held because the listener is not ready.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Create the durable queue if needed, open a consumer session on it and
    /// start consuming. Does nothing when already connected.
    pub fn connect(&mut self, broker: &dyn Broker) -> Result<(), BrokerError> {
        if self.is_connected() {
            debug!(queue = %self.queue, "receiver already connected");
            return Ok(());
        }
        // A worker that exited on its own still owns nothing; drop its handle.
        if let Some(stale) = self.worker.take() {
            stale.stop();
        }

        ensure_queue(broker, &self.address, &self.queue)?;
        let mut session = broker.create_consumer_session(&self.queue)?;
        if let Err(err) = session.start() {
            if let Err(close_err) = session.close() {
                warn!(
                    queue = %self.queue,
                    error = %close_err,
                    "failed to close consumer session after start failure"
                );
            }
            return Err(err);
        }

        self.paused.store(false, Ordering::SeqCst);
        let worker = ConsumerThread::spawn(
            session,
            Arc::clone(&self.listener),
            self.poll_interval,
            Arc::clone(&self.paused),
        )
        .map_err(|err| BrokerError::Other(format!("failed to spawn receiver thread: {}", err)))?;

        info!(queue = %self.queue, listener = self.listener.name(), "receiver connected");
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop consumption and close the session. Closing a receiver that is not
    /// connected is a no-op.
    pub fn close(&mut self) -> ReceiverStats {
        match self.worker.take() {
            Some(worker) => {
                let stats = worker.stop();
                self.paused.store(false, Ordering::SeqCst);
                info!(queue = %self.queue, ?stats, "receiver closed");
                stats
            }
            None => ReceiverStats::default(),
        }
    }
}

impl Drop for MessageReceiver {
    fn drop(&mut self) {
        self.close();
    }
}
