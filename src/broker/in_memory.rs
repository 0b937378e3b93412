//! In-memory broker for tests, demos and single-process deployments.
//!
//! Behaves like a durable broker with transactional sessions:
//! - queues are bound to an address and receive a copy of every message sent to it
//! - queues survive [`go_down`](InMemoryBroker::go_down) / [`come_up`](InMemoryBroker::come_up)
//! - delivered but uncommitted messages return to the front of their queue on
//!   rollback, on session close and when the broker goes down
//! - every outage or transport replacement bumps the connection epoch, which
//!   invalidates the sessions opened before it
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use audit_bus::broker::{Broker, BrokerMessage, InMemoryBroker};
//!
//! let broker = InMemoryBroker::new();
//! broker.create_queue("event.default", "event.audit").unwrap();
//!
//! let mut producer = broker.create_producer_session().unwrap();
//! producer.send("event.default", BrokerMessage::new("m-1", b"{}".to_vec())).unwrap();
//!
//! let mut consumer = broker.create_consumer_session("event.audit").unwrap();
//! consumer.start().unwrap();
//! let msg = consumer.receive(Duration::from_millis(50)).unwrap().unwrap();
//! consumer.acknowledge(&msg).unwrap();
//! consumer.commit().unwrap();
//! assert_eq!(broker.queue_depth("event.audit"), 0);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{Broker, BrokerMessage, ConsumerSession, ProducerSession};
use crate::error::BrokerError;
use crate::status::{ConnectionStatus, HealthCheck};

struct Queue {
    address: String,
    ready: VecDeque<BrokerMessage>,
}

struct InFlight {
    queue: String,
    message: BrokerMessage,
    acked: bool,
}

#[derive(Default)]
struct State {
    available: bool,
    closed: bool,
    epoch: u64,
    next_session: u64,
    queues: BTreeMap<String, Queue>,
    in_flight: HashMap<u64, Vec<InFlight>>,
    producer_sessions: usize,
    consumer_sessions: usize,
    published: Vec<(String, BrokerMessage)>,
}

impl State {
    fn check_live(&self, epoch: u64) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Unavailable("broker connection closed".into()));
        }
        if !self.available || self.epoch != epoch {
            return Err(BrokerError::Unavailable("connection lost".into()));
        }
        Ok(())
    }

    /// Put a session's in-flight messages back at the head of their queues.
    fn requeue(&mut self, session: u64) {
        let Some(messages) = self.in_flight.remove(&session) else {
            return;
        };
        for entry in messages.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                let mut message = entry.message;
                message.delivery_count += 1;
                queue.ready.push_front(message);
            }
        }
    }

    fn requeue_all(&mut self) {
        let sessions: Vec<u64> = self.in_flight.keys().copied().collect();
        for session in sessions {
            self.requeue(session);
        }
    }
}

/// Thread-safe in-memory broker. Clones share the same state.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker that is up and reachable.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                available: true,
                ..State::default()
            })),
        }
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, BrokerError> {
        self.state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned(operation))
    }

    fn inspect(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate an outage. Open sessions become unusable and their
    /// uncommitted messages return to the queues.
    pub fn go_down(&self) {
        let mut state = self.inspect();
        state.available = false;
        state.epoch += 1;
        state.requeue_all();
        debug!(epoch = state.epoch, "in-memory broker down");
    }

    /// End an outage. Queues and their messages are intact.
    pub fn come_up(&self) {
        let mut state = self.inspect();
        state.available = true;
        debug!(epoch = state.epoch, "in-memory broker up");
    }

    /// Replace the underlying transport without a visible outage.
    pub fn replace_transport(&self) {
        let mut state = self.inspect();
        state.epoch += 1;
        state.requeue_all();
    }

    pub fn is_available(&self) -> bool {
        let state = self.inspect();
        state.available && !state.closed
    }

    pub fn is_closed(&self) -> bool {
        self.inspect().closed
    }

    /// Names of all durable queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        self.inspect().queues.keys().cloned().collect()
    }

    /// Messages waiting for delivery on `queue` (excludes in-flight ones).
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.inspect()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered from `queue` but not yet committed or rolled back.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.inspect()
            .in_flight
            .values()
            .flatten()
            .filter(|entry| entry.queue == queue)
            .count()
    }

    /// Every message sent to `address`, in send order.
    pub fn published(&self, address: &str) -> Vec<BrokerMessage> {
        self.inspect()
            .published
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn producer_sessions_created(&self) -> usize {
        self.inspect().producer_sessions
    }

    pub fn consumer_sessions_created(&self) -> usize {
        self.inspect().consumer_sessions
    }
}

impl Broker for InMemoryBroker {
    fn create_producer_session(&self) -> Result<Box<dyn ProducerSession>, BrokerError> {
        let mut state = self.lock("create_producer_session")?;
        let epoch = state.epoch;
        state.check_live(epoch)?;
        state.producer_sessions += 1;
        Ok(Box::new(InMemoryProducer {
            state: Arc::clone(&self.state),
            epoch,
            closed: false,
        }))
    }

    fn create_consumer_session(
        &self,
        queue: &str,
    ) -> Result<Box<dyn ConsumerSession>, BrokerError> {
        let mut state = self.lock("create_consumer_session")?;
        let epoch = state.epoch;
        state.check_live(epoch)?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::NoSuchQueue(queue.to_string()));
        }
        state.next_session += 1;
        state.consumer_sessions += 1;
        Ok(Box::new(InMemoryConsumer {
            state: Arc::clone(&self.state),
            id: state.next_session,
            queue: queue.to_string(),
            epoch,
            started: false,
            closed: false,
        }))
    }

    fn create_queue(&self, address: &str, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.lock("create_queue")?;
        let epoch = state.epoch;
        state.check_live(epoch)?;
        if state.queues.contains_key(queue) {
            return Err(BrokerError::QueueExists(queue.to_string()));
        }
        state.queues.insert(
            queue.to_string(),
            Queue {
                address: address.to_string(),
                ready: VecDeque::new(),
            },
        );
        Ok(())
    }

    fn connection_epoch(&self) -> u64 {
        self.inspect().epoch
    }

    fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.lock("close")?;
        state.requeue_all();
        state.closed = true;
        Ok(())
    }
}

impl HealthCheck<ConnectionStatus> for InMemoryBroker {
    fn check(&self) -> ConnectionStatus {
        if self.is_available() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Down
        }
    }
}

struct InMemoryProducer {
    state: Arc<Mutex<State>>,
    epoch: u64,
    closed: bool,
}

impl ProducerSession for InMemoryProducer {
    fn send(&mut self, address: &str, message: BrokerMessage) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::SessionClosed);
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned("send"))?;
        state.check_live(self.epoch)?;
        for queue in state.queues.values_mut() {
            if queue.address == address {
                queue.ready.push_back(message.clone());
            }
        }
        state.published.push((address.to_string(), message));
        Ok(())
    }

    fn close(&mut self) -> Result<(), BrokerError> {
        self.closed = true;
        Ok(())
    }
}

struct InMemoryConsumer {
    state: Arc<Mutex<State>>,
    id: u64,
    queue: String,
    epoch: u64,
    started: bool,
    closed: bool,
}

impl InMemoryConsumer {
    fn live_state(&self, operation: &'static str) -> Result<MutexGuard<'_, State>, BrokerError> {
        if self.closed {
            return Err(BrokerError::SessionClosed);
        }
        let state = self
            .state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned(operation))?;
        state.check_live(self.epoch)?;
        Ok(state)
    }
}

impl ConsumerSession for InMemoryConsumer {
    fn start(&mut self) -> Result<(), BrokerError> {
        self.live_state("start")?;
        self.started = true;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut state = self.live_state("receive")?;
                if self.started {
                    let next = state
                        .queues
                        .get_mut(&self.queue)
                        .and_then(|q| q.ready.pop_front());
                    if let Some(message) = next {
                        state.in_flight.entry(self.id).or_default().push(InFlight {
                            queue: self.queue.clone(),
                            message: message.clone(),
                            acked: false,
                        });
                        return Ok(Some(message));
                    }
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn acknowledge(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let id = self.id;
        let mut state = self.live_state("acknowledge")?;
        let entry = state
            .in_flight
            .get_mut(&id)
            .and_then(|entries| {
                entries
                    .iter_mut()
                    .find(|e| !e.acked && e.message.id == message.id)
            })
            .ok_or_else(|| BrokerError::Other(format!("message {} not in flight", message.id)))?;
        entry.acked = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), BrokerError> {
        let id = self.id;
        let mut state = self.live_state("commit")?;
        if let Some(entries) = state.in_flight.get_mut(&id) {
            entries.retain(|e| !e.acked);
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BrokerError> {
        let id = self.id;
        let mut state = self.live_state("rollback")?;
        state.requeue(id);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::SessionClosed);
        }
        self.started = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.started = false;
        let mut state = self
            .state
            .lock()
            .map_err(|_| BrokerError::LockPoisoned("close"))?;
        state.requeue(self.id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
