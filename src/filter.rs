//! Audit event filter.
//!
//! Decides whether an event is dropped before it reaches the sink. Evaluation
//! order: disabled filters never filter; the exclude list wins over the include
//! list; anything unlisted falls back to the default policy.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::{Event, EventType, Target};

/// What to do with events that appear in neither list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterPolicy {
    DoFilter,
    DoNotFilter,
}

/// Filter configuration as read from the config file.
///
/// List entries are `TYPE-TARGET` keys such as `CREATED-POOL`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    pub policy: FilterPolicy,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: FilterPolicy::DoFilter,
            // Events other integrations depend on.
            include: vec![
                "CREATED-ENTITLEMENT".into(),
                "DELETED-ENTITLEMENT".into(),
                "CREATED-POOL".into(),
                "DELETED-POOL".into(),
                "CREATED-COMPLIANCE".into(),
            ],
            exclude: Vec::new(),
        }
    }
}

/// Pure predicate over `(type, target)`.
#[derive(Clone, Debug)]
pub struct EventFilter {
    enabled: bool,
    policy: FilterPolicy,
    include: HashSet<(EventType, Target)>,
    exclude: HashSet<(EventType, Target)>,
}

impl EventFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            enabled: config.enabled,
            policy: config.policy,
            include: parse_keys(&config.include),
            exclude: parse_keys(&config.exclude),
        }
    }

    /// A filter that lets everything through.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            policy: FilterPolicy::DoNotFilter,
            include: HashSet::new(),
            exclude: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns `true` when the event must be dropped.
    pub fn should_filter(&self, event: &Event) -> bool {
        self.should_filter_kind(event.event_type, event.target)
    }

    pub fn should_filter_kind(&self, event_type: EventType, target: Target) -> bool {
        if !self.enabled {
            return false;
        }
        let key = (event_type, target);
        if self.exclude.contains(&key) {
            return true;
        }
        if self.include.contains(&key) {
            return false;
        }
        self.policy == FilterPolicy::DoFilter
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

/// Parses `TYPE-TARGET` keys; entries may also be comma separated.
///
/// Unparseable keys are logged and skipped.
pub(crate) fn parse_keys(entries: &[String]) -> HashSet<(EventType, Target)> {
    entries
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .filter_map(|key| match parse_key(key) {
            Some(parsed) => Some(parsed),
            None => {
                warn!(key, "ignoring malformed audit filter key");
                None
            }
        })
        .collect()
}

/// Splits on the first `-` only; targets themselves may contain underscores.
pub(crate) fn parse_key(key: &str) -> Option<(EventType, Target)> {
    let (event_type, target) = key.split_once('-')?;
    Some((event_type.parse().ok()?, target.parse().ok()?))
}
