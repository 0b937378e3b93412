//! Message source - owns every receiver and follows the broker's status.
//!
//! When the broker becomes reachable each receiver (re)creates its durable
//! queue and consumer session; when it goes down the receivers are closed
//! and their queues left in place for the next connection.
//!
//! Every health poll that confirms CONNECTED is checked too: a replaced
//! transport reconnects all receivers, and a receiver without a session is
//! connected again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::listeners::EventListener;
use crate::receiver::MessageReceiver;
use crate::status::{ConnectionStatus, ConnectionStatusListener, StatusMonitor};

/// What the source does in response to a status update or confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    /// Connect every receiver that is not connected yet.
    Connect,
    /// Close and reconnect every receiver; the transport was replaced.
    Reconnect,
    /// Close every receiver.
    Disconnect,
    Ignore,
}

/// Decide how to react to `new` when receivers are (or are not) `connected`.
///
/// `transport_changed` is set when the broker's transport moved since the
/// receivers connected. `receivers_missing` is set when some receiver has no
/// live session, either because opening it failed or because it was lost.
pub fn source_action(
    connected: bool,
    new: ConnectionStatus,
    transport_changed: bool,
    receivers_missing: bool,
) -> SourceAction {
    match new {
        ConnectionStatus::Connected if !connected => SourceAction::Connect,
        ConnectionStatus::Connected if transport_changed => SourceAction::Reconnect,
        ConnectionStatus::Connected if receivers_missing => SourceAction::Connect,
        ConnectionStatus::Connected => SourceAction::Ignore,
        ConnectionStatus::Down if connected => SourceAction::Disconnect,
        ConnectionStatus::Down | ConnectionStatus::Unknown => SourceAction::Ignore,
    }
}

struct SourceState {
    receivers: Vec<MessageReceiver>,
    connected: bool,
    /// Broker transport the receivers were connected on.
    epoch: Option<u64>,
    shut_down: bool,
}

/// Creates one receiver per listener and drives them from broker status.
pub struct MessageSource {
    broker: Arc<dyn Broker>,
    state: Mutex<SourceState>,
}

impl MessageSource {
    pub fn new(
        broker: Arc<dyn Broker>,
        listeners: Vec<Arc<dyn EventListener>>,
        prefix: &str,
        receive_timeout: Duration,
    ) -> Self {
        let receivers = listeners
            .into_iter()
            .map(|listener| MessageReceiver::new(listener, prefix, receive_timeout))
            .collect();

        Self {
            broker,
            state: Mutex::new(SourceState {
                receivers,
                connected: false,
                epoch: None,
                shut_down: false,
            }),
        }
    }

    /// Register with `monitor` and connect right away if the broker is
    /// already known to be up.
    pub fn attach(self: &Arc<Self>, monitor: &StatusMonitor<ConnectionStatus>) {
        monitor.register(Arc::clone(self) as Arc<dyn ConnectionStatusListener<ConnectionStatus>>);
        if monitor.current() == ConnectionStatus::Connected {
            self.apply(ConnectionStatus::Connected);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn receiver_count(&self) -> usize {
        self.lock().receivers.len()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Queue names of all receivers, in listener order.
    pub fn queues(&self) -> Vec<String> {
        self.lock()
            .receivers
            .iter()
            .map(|r| r.queue().to_string())
            .collect()
    }

    /// Names of listeners whose receiver currently holds a message back.
    pub fn paused_listeners(&self) -> Vec<String> {
        self.lock()
            .receivers
            .iter()
            .filter(|r| r.is_paused())
            .map(|r| r.listener_name().to_string())
            .collect()
    }

    /// Close every receiver. Later status updates are ignored.
    pub fn shut_down(&self) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        close_all(&mut state);
        info!("message source shut down");
    }

    fn apply(&self, new: ConnectionStatus) {
        let mut state = self.lock();
        if state.shut_down {
            debug!(?new, "message source shut down, ignoring status update");
            return;
        }

        let epoch = self.broker.connection_epoch();
        let transport_changed = state.epoch.is_some_and(|e| e != epoch);
        let missing = state.receivers.iter().any(|r| !r.is_connected());

        match source_action(state.connected, new, transport_changed, missing) {
            SourceAction::Connect => {
                if state.connected {
                    info!("reconnecting receivers without a session");
                }
                self.connect_all(&mut state, epoch)
            }
            SourceAction::Reconnect => {
                info!(epoch, "broker transport replaced, reconnecting receivers");
                close_all(&mut state);
                self.connect_all(&mut state, epoch);
            }
            SourceAction::Disconnect => close_all(&mut state),
            SourceAction::Ignore => {}
        }
    }

    fn connect_all(&self, state: &mut SourceState, epoch: u64) {
        let mut failures = 0;
        for receiver in &mut state.receivers {
            if let Err(err) = receiver.connect(self.broker.as_ref()) {
                failures += 1;
                error!(queue = receiver.queue(), error = %err, "failed to connect receiver");
            }
        }
        state.connected = true;
        state.epoch = Some(epoch);
        info!(receivers = state.receivers.len(), failures, "receivers connected");
    }
}

fn close_all(state: &mut SourceState) {
    for receiver in &mut state.receivers {
        let stats = receiver.close();
        if stats.receive_errors > 0 {
            warn!(queue = receiver.queue(), errors = stats.receive_errors, "receiver saw receive errors");
        }
    }
    state.connected = false;
    state.epoch = None;
}

impl ConnectionStatusListener<ConnectionStatus> for MessageSource {
    fn on_status_update(&self, old: ConnectionStatus, new: ConnectionStatus) {
        debug!(?old, ?new, "message source status update");
        self.apply(new);
    }

    fn on_status_confirmed(&self, current: ConnectionStatus) {
        self.apply(current);
    }
}

impl Drop for MessageSource {
    fn drop(&mut self) {
        self.shut_down();
    }
}
