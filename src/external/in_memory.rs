//! In-memory external bus for tests and the demo binary.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{BusConnection, BusProducer, BusStatus, BusTransport};
use crate::error::BusError;
use crate::status::HealthCheck;

struct BusLog {
    reachable: bool,
    fail_sends: bool,
    status: BusStatus,
    connects: usize,
    producers_created: usize,
    io_attempts: usize,
    sent: Vec<(String, Vec<u8>)>,
}

/// Records every connection, producer and message. Clones share state.
#[derive(Clone)]
pub struct InMemoryBus {
    log: Arc<Mutex<BusLog>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// A reachable bus that reports itself connected.
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(BusLog {
                reachable: true,
                fail_sends: false,
                status: BusStatus::Connected,
                connects: 0,
                producers_created: 0,
                io_attempts: 0,
                sent: Vec::new(),
            })),
        }
    }

    fn log(&self) -> MutexGuard<'_, BusLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether new connections succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.log().reachable = reachable;
    }

    /// Make every send fail with a transport error.
    pub fn fail_sends(&self, fail: bool) {
        self.log().fail_sends = fail;
    }

    /// What the health check reports next.
    pub fn set_status(&self, status: BusStatus) {
        self.log().status = status;
    }

    pub fn connects(&self) -> usize {
        self.log().connects
    }

    pub fn producers_created(&self) -> usize {
        self.log().producers_created
    }

    /// Every operation that would have touched the network.
    pub fn io_attempts(&self) -> usize {
        self.log().io_attempts
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.log().sent.clone()
    }

    pub fn sent_to(&self, destination: &str) -> Vec<Vec<u8>> {
        self.log()
            .sent
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl BusTransport for InMemoryBus {
    fn connect(&self) -> Result<Box<dyn BusConnection>, BusError> {
        let mut log = self.log();
        log.io_attempts += 1;
        if !log.reachable {
            return Err(BusError::Transport("connection refused".into()));
        }
        log.connects += 1;
        Ok(Box::new(InMemoryConnection {
            log: Arc::clone(&self.log),
        }))
    }
}

impl HealthCheck<BusStatus> for InMemoryBus {
    fn check(&self) -> BusStatus {
        self.log().status
    }
}

struct InMemoryConnection {
    log: Arc<Mutex<BusLog>>,
}

impl BusConnection for InMemoryConnection {
    fn create_producer(&mut self, destination: &str) -> Result<Box<dyn BusProducer>, BusError> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.io_attempts += 1;
        log.producers_created += 1;
        Ok(Box::new(InMemoryProducer {
            log: Arc::clone(&self.log),
            destination: destination.to_string(),
        }))
    }

    fn close(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}

struct InMemoryProducer {
    log: Arc<Mutex<BusLog>>,
    destination: String,
}

impl BusProducer for InMemoryProducer {
    fn send(&mut self, payload: &[u8]) -> Result<(), BusError> {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.io_attempts += 1;
        if log.fail_sends {
            return Err(BusError::Transport(format!("send to {} failed", self.destination)));
        }
        log.sent.push((self.destination.clone(), payload.to_vec()));
        Ok(())
    }
}
