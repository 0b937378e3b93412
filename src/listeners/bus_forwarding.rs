use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::EventListener;
use crate::error::ListenerError;
use crate::event::{Event, EventType, Target};
use crate::external::ExternalBusConnector;
use crate::filter::parse_keys;

/// Republishes selected events to the external bus.
///
/// While the bus is down or flow-stopped the listener reports itself not
/// ready, so its receiver pauses and events stay in the durable queue.
pub struct BusForwardingListener {
    connector: Arc<ExternalBusConnector>,
    /// Empty forwards everything.
    selected: HashSet<(EventType, Target)>,
}

impl BusForwardingListener {
    pub const NAME: &'static str = "audit_bus.listeners.BusForwardingListener";

    pub fn new(connector: Arc<ExternalBusConnector>) -> Self {
        Self {
            connector,
            selected: HashSet::new(),
        }
    }

    /// Forward only events matching these `TYPE-TARGET` keys.
    pub fn with_forward_keys(mut self, keys: &[String]) -> Self {
        self.selected = parse_keys(keys);
        self
    }

    fn forwards(&self, event: &Event) -> bool {
        self.selected.is_empty() || self.selected.contains(&(event.event_type, event.target))
    }
}

impl EventListener for BusForwardingListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        if !self.forwards(event) {
            debug!(key = %event.filter_key(), "not forwarded to external bus");
            return Ok(());
        }

        let payload = event
            .to_json()
            .map_err(|err| ListenerError::Failed(format!("event serialization failed: {}", err)))?;
        self.connector
            .send(event.target.as_str(), event.event_type.as_str(), &payload)?;
        Ok(())
    }

    fn check_ready(&self) -> Result<(), ListenerError> {
        self.connector.check_ready().map_err(ListenerError::Transport)
    }
}
