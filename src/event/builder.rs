use chrono::Utc;
use uuid::Uuid;

use super::{Event, EventType, Target};

/// Builder for [`Event`].
///
/// The id and timestamp are assigned when [`build`](EventBuilder::build) is
/// called, so an event is stamped exactly once.
///
/// ```
/// use audit_bus::event::{Event, EventType, Target};
///
/// let event = Event::builder(EventType::Created, Target::Consumer)
///     .owner_id("o1")
///     .consumer_uuid("c-123")
///     .build();
///
/// assert_eq!(event.filter_key(), "CREATED-CONSUMER");
/// ```
#[derive(Clone, Debug)]
pub struct EventBuilder {
    event_type: EventType,
    target: Target,
    target_name: Option<String>,
    principal: Option<String>,
    owner_id: Option<String>,
    consumer_uuid: Option<String>,
    entity_id: Option<String>,
    reference_id: Option<String>,
    reference_type: Option<String>,
    old_entity_json: Option<String>,
    new_entity_json: Option<String>,
    event_data: Option<serde_json::Value>,
}

impl EventBuilder {
    pub fn new(event_type: EventType, target: Target) -> Self {
        Self {
            event_type,
            target,
            target_name: None,
            principal: None,
            owner_id: None,
            consumer_uuid: None,
            entity_id: None,
            reference_id: None,
            reference_type: None,
            old_entity_json: None,
            new_entity_json: None,
            event_data: None,
        }
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn consumer_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.consumer_uuid = Some(uuid.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Cross-reference a related entity, e.g. the pool an entitlement came from.
    pub fn reference(mut self, reference_type: impl Into<String>, id: impl Into<String>) -> Self {
        self.reference_type = Some(reference_type.into());
        self.reference_id = Some(id.into());
        self
    }

    pub fn old_entity_json(mut self, json: impl Into<String>) -> Self {
        self.old_entity_json = Some(json.into());
        self
    }

    pub fn new_entity_json(mut self, json: impl Into<String>) -> Self {
        self.new_entity_json = Some(json.into());
        self
    }

    pub fn event_data(mut self, data: serde_json::Value) -> Self {
        self.event_data = Some(data);
        self
    }

    pub fn build(self) -> Event {
        Event {
            id: Uuid::new_v4().to_string(),
            event_type: self.event_type,
            target: self.target,
            target_name: self.target_name,
            principal: self.principal,
            timestamp: Utc::now(),
            owner_id: self.owner_id,
            consumer_uuid: self.consumer_uuid,
            entity_id: self.entity_id,
            reference_id: self.reference_id,
            reference_type: self.reference_type,
            old_entity_json: self.old_entity_json,
            new_entity_json: self.new_entity_json,
            event_data: self.event_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_assigns_unique_ids() {
        let builder = EventBuilder::new(EventType::Deleted, Target::Pool).entity_id("p-1");
        let a = builder.clone().build();
        let b = builder.build();
        assert_ne!(a.id, b.id);
        assert_eq!(a.entity_id.as_deref(), Some("p-1"));
    }

    #[test]
    fn reference_sets_both_fields() {
        let event = EventBuilder::new(EventType::Created, Target::Entitlement)
            .reference("POOL", "pool-7")
            .build();
        assert_eq!(event.reference_type.as_deref(), Some("POOL"));
        assert_eq!(event.reference_id.as_deref(), Some("pool-7"));
    }
}
