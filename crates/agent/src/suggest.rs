//! Automation suggestions from detected usage patterns.
//!
//! Three pattern kinds map to automations:
//!
//! | `pattern_type` | Trigger                              | Action                     |
//! |----------------|--------------------------------------|----------------------------|
//! | `time-based`   | `time` at `data.time.time`           | turn on the first entity   |
//! | `correlation`  | first entity reaches `trigger_state` | turn on the second entity  |
//! | `presence`     | person/tracker arrives `home`        | turn on every other entity |
//!
//! Every referenced entity must have a stored snapshot; patterns naming
//! unknown entities produce no suggestion.

use nexus_core::device::DeviceApi;
use nexus_core::error::DeviceError;
use nexus_core::records::{EntitySnapshot, NewAutomation, Pattern};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Patterns below this confidence are not worth suggesting.
pub const MIN_SUGGESTION_CONFIDENCE: f64 = 0.6;

const DEFAULT_TIME: &str = "17:00:00";

/// The pattern kinds that have a suggestion rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    TimeBased,
    Correlation,
    Presence,
}

impl PatternKind {
    pub fn parse(pattern_type: &str) -> Option<Self> {
        match pattern_type {
            "time-based" => Some(Self::TimeBased),
            "correlation" => Some(Self::Correlation),
            "presence" => Some(Self::Presence),
            _ => None,
        }
    }
}

/// Suggestions for every pattern at or above [`MIN_SUGGESTION_CONFIDENCE`],
/// in input order.
pub fn suggest_automations(
    patterns: &[Pattern],
    entities: &HashMap<String, EntitySnapshot>,
) -> Vec<NewAutomation> {
    patterns
        .iter()
        .filter(|p| p.confidence >= MIN_SUGGESTION_CONFIDENCE)
        .filter_map(|p| suggest(p, entities))
        .collect()
}

/// The automation suggested by one pattern, if its kind and entities allow.
pub fn suggest(pattern: &Pattern, entities: &HashMap<String, EntitySnapshot>) -> Option<NewAutomation> {
    let kind = PatternKind::parse(&pattern.pattern_type)?;
    let suggestion = match kind {
        PatternKind::TimeBased => time_based(pattern, entities),
        PatternKind::Correlation => correlation(pattern, entities),
        PatternKind::Presence => presence(pattern, entities),
    };
    if suggestion.is_none() {
        debug!(pattern = %pattern.name, "Pattern yields no suggestion");
    }
    suggestion
}

fn turn_on(entity: &EntitySnapshot) -> serde_json::Value {
    json!({
        "service": format!("{}.turn_on", entity.domain),
        "target": {"entity_id": entity.entity_id},
    })
}

fn suggestion(
    pattern: &Pattern,
    name: String,
    description: String,
    triggers: serde_json::Value,
    actions: Vec<serde_json::Value>,
) -> NewAutomation {
    NewAutomation {
        name,
        description,
        triggers,
        conditions: json!([]),
        actions: serde_json::Value::Array(actions),
        is_suggested: true,
        confidence: pattern.confidence,
    }
}

fn time_based(pattern: &Pattern, entities: &HashMap<String, EntitySnapshot>) -> Option<NewAutomation> {
    let time = pattern.data.get("time")?.as_object().filter(|t| !t.is_empty())?;
    let entity = entities.get(pattern.entities.first()?)?;

    let at = time.get("time").and_then(|t| t.as_str());
    Some(suggestion(
        pattern,
        format!("Turn on {} at {}", entity.friendly_name, at.unwrap_or("17:00")),
        format!("Based on your usage pattern of {}", entity.friendly_name),
        json!([{"platform": "time", "at": at.unwrap_or(DEFAULT_TIME)}]),
        vec![turn_on(entity)],
    ))
}

fn correlation(pattern: &Pattern, entities: &HashMap<String, EntitySnapshot>) -> Option<NewAutomation> {
    let [trigger_id, action_id, ..] = pattern.entities.as_slice() else {
        return None;
    };
    let trigger = entities.get(trigger_id)?;
    let action = entities.get(action_id)?;
    let to = pattern
        .data
        .get("trigger_state")
        .and_then(|s| s.as_str())
        .unwrap_or("on");

    Some(suggestion(
        pattern,
        format!("Turn on {} when {} is {to}", action.friendly_name, trigger.friendly_name),
        format!(
            "Based on correlation between {} and {}",
            trigger.friendly_name, action.friendly_name
        ),
        json!([{"platform": "state", "entity_id": trigger.entity_id, "to": to}]),
        vec![turn_on(action)],
    ))
}

fn presence(pattern: &Pattern, entities: &HashMap<String, EntitySnapshot>) -> Option<NewAutomation> {
    let presence_id = pattern
        .entities
        .iter()
        .find(|e| e.starts_with("person.") || e.starts_with("device_tracker."))?;
    let person = entities.get(presence_id)?;

    let actions: Vec<_> = pattern
        .entities
        .iter()
        .filter(|e| *e != presence_id)
        .filter_map(|e| entities.get(e.as_str()))
        .map(turn_on)
        .collect();
    if actions.is_empty() {
        return None;
    }

    Some(suggestion(
        pattern,
        format!("Turn on lights when {} arrives home", person.friendly_name),
        format!("Based on presence pattern of {}", person.friendly_name),
        json!([{"platform": "state", "entity_id": person.entity_id, "to": "home"}]),
        actions,
    ))
}

/// Ask Home Assistant to reload its automations. Failures are logged and
/// returned; saving an automation does not depend on them.
pub async fn reload_automations(devices: &dyn DeviceApi) -> Result<(), DeviceError> {
    match devices
        .call_service("automation", "reload", &serde_json::Map::new())
        .await
    {
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(error = %e, "Failed to reload automations in Home Assistant");
            Err(e)
        }
    }
}
