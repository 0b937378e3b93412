use std::sync::{Arc, Mutex};

use tracing::info;

use super::EventListener;
use crate::error::ListenerError;
use crate::event::Event;

/// Writes one audit line per event.
///
/// Lines go to the `audit` tracing target; with a buffer they are also
/// collected in memory, which tests use to inspect the audit trail.
pub struct LoggingListener {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl Default for LoggingListener {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingListener {
    pub const NAME: &'static str = "audit_bus.listeners.LoggingListener";

    pub fn new() -> Self {
        LoggingListener { buffer: None }
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LoggingListener {
            buffer: Some(buffer),
        }
    }

    /// The audit line for `event`.
    pub fn format(event: &Event) -> String {
        fn or_dash(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("-")
        }

        format!(
            "{} principal={} target={} type={} ownerId={} consumerUuid={} entityId={} name={}",
            event.timestamp.to_rfc3339(),
            or_dash(&event.principal),
            event.target,
            event.event_type,
            or_dash(&event.owner_id),
            or_dash(&event.consumer_uuid),
            or_dash(&event.entity_id),
            or_dash(&event.target_name),
        )
    }
}

impl EventListener for LoggingListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        let line = Self::format(event);
        info!(target: "audit", event_id = %event.id, "{}", line);

        if let Some(buffer) = &self.buffer {
            buffer
                .lock()
                .map_err(|_| ListenerError::Failed("audit buffer lock poisoned".into()))?
                .push(line);
        }
        Ok(())
    }
}
