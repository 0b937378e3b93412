use std::sync::{Arc, Mutex};

use super::{ActivationListener, BusForwardingListener, EventListener, LoggingListener, SubscriptionService};
use crate::config::{ExternalBusConfig, WebhookConfig};
use crate::error::Error;
use crate::external::ExternalBusConnector;

/// Listener names accepted in the `listeners` config list.
pub const KNOWN_LISTENERS: &[&str] = &[
    "LoggingListener",
    "ActivationListener",
    "WebhookListener",
    "BusForwardingListener",
];

/// Everything a configured listener may need at construction.
pub struct ListenerContext {
    pub subscriptions: Arc<dyn SubscriptionService>,
    pub webhook: WebhookConfig,
    pub external_bus: ExternalBusConfig,
    pub connector: Option<Arc<ExternalBusConnector>>,
    /// Collects audit lines in memory as well as logging them.
    pub audit_buffer: Option<Arc<Mutex<Vec<String>>>>,
}

/// Build the listener configured under `name`.
pub fn build_listener(name: &str, ctx: &ListenerContext) -> Result<Arc<dyn EventListener>, Error> {
    match name {
        "LoggingListener" => Ok(match &ctx.audit_buffer {
            Some(buffer) => Arc::new(LoggingListener::with_buffer(Arc::clone(buffer))),
            None => Arc::new(LoggingListener::new()),
        }),
        "ActivationListener" => Ok(Arc::new(ActivationListener::new(Arc::clone(
            &ctx.subscriptions,
        )))),
        #[cfg(feature = "webhook")]
        "WebhookListener" => Ok(Arc::new(super::WebhookListener::new(&ctx.webhook)?)),
        "BusForwardingListener" => {
            let connector = ctx.connector.as_ref().ok_or_else(|| {
                Error::UnknownListener(format!("{} (external bus not enabled)", name))
            })?;
            Ok(Arc::new(
                BusForwardingListener::new(Arc::clone(connector))
                    .with_forward_keys(&ctx.external_bus.forward),
            ))
        }
        other => Err(Error::UnknownListener(other.to_string())),
    }
}
