//! Event model - the immutable record carried through the sink and receivers.
//!
//! Events are built once through [`EventBuilder`] and never mutated after
//! being handed to a sink. The wire format is JSON with camelCase field names;
//! unknown fields are ignored on decode so newer producers stay readable.

mod builder;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use builder::EventBuilder;

/// What happened to the target entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Modified,
    Deleted,
    Expired,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Created,
        EventType::Modified,
        EventType::Deleted,
        EventType::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
            EventType::Expired => "EXPIRED",
        }
    }
}

/// The kind of entity an event is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    Consumer,
    Owner,
    Entitlement,
    Pool,
    Export,
    Import,
    User,
    Role,
    Subscription,
    #[serde(rename = "ACTIVATIONKEY")]
    ActivationKey,
    #[serde(rename = "GUESTID")]
    GuestId,
    Rules,
    Compliance,
    SystemPurposeCompliance,
    Product,
    Content,
    ConsumerContentOverride,
}

impl Target {
    pub const ALL: [Target; 17] = [
        Target::Consumer,
        Target::Owner,
        Target::Entitlement,
        Target::Pool,
        Target::Export,
        Target::Import,
        Target::User,
        Target::Role,
        Target::Subscription,
        Target::ActivationKey,
        Target::GuestId,
        Target::Rules,
        Target::Compliance,
        Target::SystemPurposeCompliance,
        Target::Product,
        Target::Content,
        Target::ConsumerContentOverride,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Consumer => "CONSUMER",
            Target::Owner => "OWNER",
            Target::Entitlement => "ENTITLEMENT",
            Target::Pool => "POOL",
            Target::Export => "EXPORT",
            Target::Import => "IMPORT",
            Target::User => "USER",
            Target::Role => "ROLE",
            Target::Subscription => "SUBSCRIPTION",
            Target::ActivationKey => "ACTIVATIONKEY",
            Target::GuestId => "GUESTID",
            Target::Rules => "RULES",
            Target::Compliance => "COMPLIANCE",
            Target::SystemPurposeCompliance => "SYSTEM_PURPOSE_COMPLIANCE",
            Target::Product => "PRODUCT",
            Target::Content => "CONTENT",
            Target::ConsumerContentOverride => "CONSUMER_CONTENT_OVERRIDE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a type or target name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised {kind}: {value}")]
pub struct ParseKindError {
    kind: &'static str,
    value: String,
}

impl FromStr for EventType {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or(ParseKindError {
                kind: "event type",
                value: s.to_string(),
            })
    }
}

impl FromStr for Target {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Target::ALL
            .into_iter()
            .find(|t| t.as_str() == upper)
            .ok_or(ParseKindError {
                kind: "target",
                value: s.to_string(),
            })
    }
}

/// A domain event.
///
/// Fields are public for reading; construct through [`Event::builder`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub target: Target,
    pub target_name: Option<String>,
    /// Serialized identity of the actor that caused the change.
    pub principal: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub owner_id: Option<String>,
    pub consumer_uuid: Option<String>,
    pub entity_id: Option<String>,
    pub reference_id: Option<String>,
    pub reference_type: Option<String>,
    #[serde(rename = "oldEntity")]
    pub old_entity_json: Option<String>,
    #[serde(rename = "newEntity")]
    pub new_entity_json: Option<String>,
    pub event_data: Option<serde_json::Value>,
}

impl Event {
    pub fn builder(event_type: EventType, target: Target) -> EventBuilder {
        EventBuilder::new(event_type, target)
    }

    /// The `TYPE-TARGET` key used by the event filter.
    pub fn filter_key(&self) -> String {
        format!("{}-{}", self.event_type, self.target)
    }

    /// Serialize to the JSON wire payload.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a JSON wire payload.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Look up a string value in `eventData`.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.event_data.as_ref()?.get(key)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kinds_case_insensitively() {
        assert_eq!("created".parse::<EventType>(), Ok(EventType::Created));
        assert_eq!(" Pool ".parse::<Target>(), Ok(Target::Pool));
        assert_eq!(
            "activationkey".parse::<Target>(),
            Ok(Target::ActivationKey)
        );
        assert!("RENAMED".parse::<EventType>().is_err());
    }

    #[test]
    fn display_matches_wire_names() {
        for target in Target::ALL {
            let json = serde_json::to_string(&target).unwrap();
            assert_eq!(json, format!("\"{}\"", target));
        }
        for event_type in EventType::ALL {
            let json = serde_json::to_string(&event_type).unwrap();
            assert_eq!(json, format!("\"{}\"", event_type));
        }
    }

    #[test]
    fn decode_ignores_unknown_fields_and_missing_optionals() {
        let payload = br#"{
            "id": "e-1",
            "type": "CREATED",
            "target": "CONSUMER",
            "timestamp": "2024-05-01T10:00:00Z",
            "ownerId": "o1",
            "messageText": "added by a newer producer"
        }"#;

        let event = Event::from_json(payload).unwrap();
        assert_eq!(event.id, "e-1");
        assert_eq!(event.owner_id.as_deref(), Some("o1"));
        assert_eq!(event.consumer_uuid, None);
        assert_eq!(event.filter_key(), "CREATED-CONSUMER");
    }

    #[test]
    fn wire_uses_camel_case_and_entity_snapshot_names() {
        let event = Event::builder(EventType::Modified, Target::Owner)
            .owner_id("o1")
            .old_entity_json(r#"{"name":"a"}"#)
            .new_entity_json(r#"{"name":"b"}"#)
            .build();

        let value: serde_json::Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "MODIFIED");
        assert_eq!(value["ownerId"], "o1");
        assert_eq!(value["oldEntity"], r#"{"name":"a"}"#);
        assert_eq!(value["newEntity"], r#"{"name":"b"}"#);
    }

    #[test]
    fn data_str_reads_event_data() {
        let event = Event::builder(EventType::Created, Target::Pool)
            .event_data(serde_json::json!({ "subscriptionId": "sub-9" }))
            .build();
        assert_eq!(event.data_str("subscriptionId"), Some("sub-9"));
        assert_eq!(event.data_str("missing"), None);
    }
}
