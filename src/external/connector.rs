use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use super::{destination, transition, BusAction, BusConnection, BusProducer, BusStatus, BusTransport};
use crate::error::BusError;
use crate::status::ConnectionStatusListener;

struct ConnectorState {
    status: BusStatus,
    flow_stopped: bool,
    connection: Option<Box<dyn BusConnection>>,
    producers: HashMap<String, Box<dyn BusProducer>>,
}

/// Holds the external bus connection and its producer cache.
///
/// Register it with a `StatusMonitor<BusStatus>`; it connects, disconnects
/// and toggles flow control according to [`transition`]. Sends never wait
/// for the bus: without a connection, or while flow is stopped, they fail
/// immediately.
pub struct ExternalBusConnector {
    transport: Box<dyn BusTransport>,
    state: Mutex<ConnectorState>,
}

impl ExternalBusConnector {
    pub fn new(transport: Box<dyn BusTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(ConnectorState {
                status: BusStatus::Unknown,
                flow_stopped: false,
                connection: None,
                producers: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> BusStatus {
        self.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connection.is_some()
    }

    pub fn is_flow_stopped(&self) -> bool {
        self.lock().flow_stopped
    }

    pub fn cached_producers(&self) -> usize {
        self.lock().producers.len()
    }

    /// Whether a send would currently be attempted.
    pub fn check_ready(&self) -> Result<(), BusError> {
        ready(&self.lock())
    }

    /// Publish `payload` to `<target>.<type>`.
    pub fn send(&self, target: &str, event_type: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut state = self.lock();
        ready(&state)?;

        let destination = destination(target, event_type);
        let state = &mut *state;
        if !state.producers.contains_key(&destination) {
            let connection = state.connection.as_mut().ok_or(BusError::NotConnected)?;
            let producer = connection.create_producer(&destination)?;
            debug!(%destination, "created external bus producer");
            state.producers.insert(destination.clone(), producer);
        }

        let producer = state
            .producers
            .get_mut(&destination)
            .ok_or(BusError::NotConnected)?;
        if let Err(err) = producer.send(payload) {
            state.producers.remove(&destination);
            return Err(err);
        }
        Ok(())
    }

    /// Close the connection for good.
    pub fn close(&self) {
        let mut state = self.lock();
        disconnect(&mut state);
    }

    fn apply(&self, old: BusStatus, new: BusStatus) {
        let mut state = self.lock();
        state.status = new;

        match transition(old, new) {
            BusAction::Connect => {
                state.flow_stopped = false;
                self.connect(&mut state);
            }
            BusAction::Disconnect => {
                disconnect(&mut state);
                state.flow_stopped = false;
            }
            BusAction::StopFlow => {
                warn!(?old, "external bus flow stopped");
                state.flow_stopped = true;
            }
            BusAction::ResumeFlow => {
                info!("external bus flow resumed");
                state.flow_stopped = false;
                // Flow may have stopped while the bus was down.
                if state.connection.is_none() {
                    self.connect(&mut state);
                }
            }
            BusAction::None => {}
        }
    }

    fn connect(&self, state: &mut ConnectorState) {
        disconnect(state);
        match self.transport.connect() {
            Ok(connection) => {
                info!("connected to external bus");
                state.connection = Some(connection);
            }
            Err(err) => error!(error = %err, "unable to connect to external bus"),
        }
    }
}

fn ready(state: &ConnectorState) -> Result<(), BusError> {
    if state.connection.is_none() {
        return Err(BusError::NotConnected);
    }
    if state.flow_stopped {
        return Err(BusError::FlowStopped);
    }
    Ok(())
}

fn disconnect(state: &mut ConnectorState) {
    state.producers.clear();
    if let Some(mut connection) = state.connection.take() {
        match connection.close() {
            Ok(()) => info!("disconnected from external bus"),
            Err(err) => warn!(error = %err, "error closing external bus connection"),
        }
    }
}

impl ConnectionStatusListener<BusStatus> for ExternalBusConnector {
    fn on_status_update(&self, old: BusStatus, new: BusStatus) {
        self.apply(old, new);
    }

    fn on_status_confirmed(&self, current: BusStatus) {
        let mut state = self.lock();
        if current == BusStatus::Connected && state.status == current && state.connection.is_none() {
            debug!("bus still connected but no connection held, retrying");
            self.connect(&mut state);
        }
    }
}
