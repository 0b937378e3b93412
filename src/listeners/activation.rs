use std::sync::Arc;

use tracing::{debug, info, warn};

use super::EventListener;
use crate::error::ListenerError;
use crate::event::{Event, EventType, Target};

/// Subscription-side actions triggered by events.
pub trait SubscriptionService: Send + Sync {
    fn send_activation_email(&self, subscription_id: &str) -> Result<(), ListenerError>;
}

/// Stand-in service that only logs the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSubscriptionService;

impl SubscriptionService for LoggingSubscriptionService {
    fn send_activation_email(&self, subscription_id: &str) -> Result<(), ListenerError> {
        info!(subscription_id, "activation email requested");
        Ok(())
    }
}

/// Sends the activation email when a pool is created for a subscription.
pub struct ActivationListener {
    subscriptions: Arc<dyn SubscriptionService>,
}

impl ActivationListener {
    pub const NAME: &'static str = "audit_bus.listeners.ActivationListener";

    pub fn new(subscriptions: Arc<dyn SubscriptionService>) -> Self {
        Self { subscriptions }
    }
}

impl EventListener for ActivationListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        if event.event_type != EventType::Created || event.target != Target::Pool {
            return Ok(());
        }

        match event.data_str("subscriptionId") {
            Some(subscription_id) => {
                debug!(subscription_id, event_id = %event.id, "pool created for subscription");
                self.subscriptions.send_activation_email(subscription_id)
            }
            None => {
                warn!(event_id = %event.id, "pool created without subscriptionId, no activation email");
                Ok(())
            }
        }
    }
}
