//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use audit_bus::broker::{Broker, BrokerMessage, ConsumerSession, InMemoryBroker, ProducerSession};
use audit_bus::{BrokerError, BusError, Config, Event, EventListener, EventType, ListenerError, Target};

/// Poll `condition` until it holds or two seconds pass.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for: {}", what);
}

/// Defaults with fast polling and only the given listeners.
pub fn fast_config(listeners: &[&str]) -> Config {
    let mut config = Config::default();
    config.listeners = listeners.iter().map(|l| l.to_string()).collect();
    config.broker.monitor_interval_ms = 10;
    config.broker.receive_timeout_ms = 10;
    config.external_bus.monitor_interval_ms = 10;
    config
}

pub fn event(event_type: EventType, target: Target) -> Event {
    Event::builder(event_type, target).owner_id("o1").build()
}

/// Publish `payload` straight to the default address.
pub fn publish_raw(broker: &dyn Broker, id: &str, payload: &[u8]) {
    let mut producer = broker.create_producer_session().unwrap();
    producer
        .send("event.default", BrokerMessage::new(id, payload.to_vec()))
        .unwrap();
    producer.close().unwrap();
}

pub fn publish(broker: &dyn Broker, event: &Event) {
    publish_raw(broker, &event.id, &event.to_json().unwrap());
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    events: Vec<Event>,
    attempts: usize,
    failures: usize,
    transport_failures: usize,
    not_ready: bool,
}

/// Records delivered events; can be told to fail or to report not-ready.
pub struct RecordingListener {
    name: String,
    script: Mutex<Script>,
}

impl RecordingListener {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(Script::default()),
        })
    }

    /// Fail the next `n` deliveries with an ordinary error.
    pub fn fail_next(&self, n: usize) {
        self.script.lock().unwrap().failures = n;
    }

    /// Fail the next `n` deliveries with an external transport error.
    pub fn transport_fail_next(&self, n: usize) {
        self.script.lock().unwrap().transport_failures = n;
    }

    pub fn set_ready(&self, ready: bool) {
        self.script.lock().unwrap().not_ready = !ready;
    }

    pub fn events(&self) -> Vec<Event> {
        self.script.lock().unwrap().events.clone()
    }

    pub fn attempts(&self) -> usize {
        self.script.lock().unwrap().attempts
    }
}

impl EventListener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        let mut script = self.script.lock().unwrap();
        script.attempts += 1;
        if script.failures > 0 {
            script.failures -= 1;
            return Err(ListenerError::Failed("scripted failure".into()));
        }
        if script.transport_failures > 0 {
            script.transport_failures -= 1;
            return Err(BusError::Transport("scripted outage".into()).into());
        }
        script.events.push(event.clone());
        Ok(())
    }

    fn check_ready(&self) -> Result<(), ListenerError> {
        if self.script.lock().unwrap().not_ready {
            Err(BusError::NotConnected.into())
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Broker wrapper recording consumer session calls
// ---------------------------------------------------------------------------

/// Consumer-session operations, per queue, in call order.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(String, &'static str)>>>,
}

impl CallLog {
    fn record(&self, queue: &str, op: &'static str) {
        self.calls.lock().unwrap().push((queue.to_string(), op));
    }

    pub fn ops(&self, queue: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, _)| q == queue)
            .map(|(_, op)| *op)
            .collect()
    }

    pub fn count(&self, queue: &str, op: &str) -> usize {
        self.ops(queue).into_iter().filter(|o| *o == op).count()
    }
}

/// Delegates to an [`InMemoryBroker`], logging session calls and optionally
/// failing `close` on chosen queues or the next few consumer sessions.
#[derive(Clone)]
pub struct RecordingBroker {
    pub inner: InMemoryBroker,
    pub log: CallLog,
    failing_close: Arc<Mutex<HashSet<String>>>,
    failing_sessions: Arc<Mutex<usize>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self {
            inner: InMemoryBroker::new(),
            log: CallLog::default(),
            failing_close: Arc::default(),
            failing_sessions: Arc::default(),
        }
    }

    pub fn fail_close_on(&self, queue: &str) {
        self.failing_close.lock().unwrap().insert(queue.to_string());
    }

    /// Refuse the next `count` consumer sessions, whatever the queue.
    pub fn fail_consumer_sessions(&self, count: usize) {
        *self.failing_sessions.lock().unwrap() = count;
    }
}

impl Broker for RecordingBroker {
    fn create_producer_session(&self) -> Result<Box<dyn ProducerSession>, BrokerError> {
        self.inner.create_producer_session()
    }

    fn create_consumer_session(&self, queue: &str) -> Result<Box<dyn ConsumerSession>, BrokerError> {
        {
            let mut failing = self.failing_sessions.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                self.log.record(queue, "refused");
                return Err(BrokerError::Unavailable("session refused".into()));
            }
        }
        let inner = self.inner.create_consumer_session(queue)?;
        Ok(Box::new(RecordingSession {
            inner,
            queue: queue.to_string(),
            log: self.log.clone(),
            fail_close: self.failing_close.lock().unwrap().contains(queue),
        }))
    }

    fn create_queue(&self, address: &str, queue: &str) -> Result<(), BrokerError> {
        self.inner.create_queue(address, queue)
    }

    fn connection_epoch(&self) -> u64 {
        self.inner.connection_epoch()
    }

    fn close(&self) -> Result<(), BrokerError> {
        self.inner.close()
    }
}

struct RecordingSession {
    inner: Box<dyn ConsumerSession>,
    queue: String,
    log: CallLog,
    fail_close: bool,
}

impl ConsumerSession for RecordingSession {
    fn start(&mut self) -> Result<(), BrokerError> {
        self.log.record(&self.queue, "start");
        self.inner.start()
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        self.inner.receive(timeout)
    }

    fn acknowledge(&mut self, message: &BrokerMessage) -> Result<(), BrokerError> {
        self.log.record(&self.queue, "ack");
        self.inner.acknowledge(message)
    }

    fn commit(&mut self) -> Result<(), BrokerError> {
        self.log.record(&self.queue, "commit");
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), BrokerError> {
        self.log.record(&self.queue, "rollback");
        self.inner.rollback()
    }

    fn stop(&mut self) -> Result<(), BrokerError> {
        self.log.record(&self.queue, "stop");
        self.inner.stop()
    }

    fn close(&mut self) -> Result<(), BrokerError> {
        self.log.record(&self.queue, "close");
        self.inner.close()?;
        if self.fail_close {
            return Err(BrokerError::Other("scripted close failure".into()));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
