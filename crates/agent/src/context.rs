//! Context assembly: pick the entities worth showing the model.
//!
//! An entity is relevant when any whitespace token of the lower-cased query
//! occurs in its lower-cased id or friendly name, or when its id starts with
//! one of the [`ALWAYS_RELEVANT`] prefixes. Keyword hits come first, then
//! allowlist hits, each in input order and deduplicated by id.
//!
//! # Determinism
//!
//! Identical inputs always render identical text. Attribute keys are emitted
//! in the fixed order of [`CONTEXT_ATTRIBUTES`].

use nexus_core::device::DeviceState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default cap on rendered entities.
pub const DEFAULT_MAX_ENTRIES: usize = 15;

/// Rendered when nothing matches.
pub const NO_RELEVANT_ENTITIES: &str = "No relevant entities found";

/// Entity id prefixes included regardless of the query.
pub const ALWAYS_RELEVANT: [&str; 6] = [
    "person",
    "binary_sensor.motion",
    "alarm_control_panel",
    "weather",
    "sensor.temperature",
    "climate",
];

/// Attributes copied into a context line, in render order.
pub const CONTEXT_ATTRIBUTES: [&str; 7] = [
    "unit_of_measurement",
    "device_class",
    "temperature",
    "humidity",
    "state_class",
    "brightness",
    "rgb_color",
];

/// One selected entity and its rendered line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub entity_id: String,
    pub rendered_line: String,
}

impl ContextEntry {
    pub fn from_state(state: &DeviceState) -> Self {
        Self {
            entity_id: state.id.clone(),
            rendered_line: render_line(state),
        }
    }
}

/// Whether an entity id is on the always-relevant allowlist.
pub fn is_always_relevant(entity_id: &str) -> bool {
    ALWAYS_RELEVANT.iter().any(|prefix| entity_id.starts_with(prefix))
}

/// Select relevant entities, in rank order, without truncation.
pub fn select(states: &[DeviceState], query: &str) -> Vec<ContextEntry> {
    let query = query.to_lowercase();
    let keywords: Vec<&str> = query.split_whitespace().collect();

    let keyword_hit = |state: &DeviceState| {
        let id = state.id.to_lowercase();
        let name = state.friendly_name.to_lowercase();
        keywords.iter().any(|k| id.contains(k) || name.contains(k))
    };

    let mut seen = HashSet::new();
    let keyword_hits = states.iter().filter(|s| keyword_hit(s));
    let allowlist_hits = states.iter().filter(|s| is_always_relevant(&s.id));

    keyword_hits
        .chain(allowlist_hits)
        .filter(|s| seen.insert(s.id.as_str()))
        .map(ContextEntry::from_state)
        .collect()
}

/// Render the context block for `query`, capped at `max_entries` lines.
///
/// When entries are cut, a final `... (N more entities available)` line
/// reports how many. Returns [`NO_RELEVANT_ENTITIES`] when nothing matches.
pub fn assemble(states: &[DeviceState], query: &str, max_entries: usize) -> String {
    let entries = select(states, query);
    if entries.is_empty() {
        return NO_RELEVANT_ENTITIES.to_string();
    }

    let hidden = entries.len().saturating_sub(max_entries);
    let mut lines: Vec<String> = entries
        .into_iter()
        .take(max_entries)
        .map(|e| e.rendered_line)
        .collect();

    if hidden > 0 {
        lines.push(format!("... ({hidden} more entities available)"));
    }
    lines.join("\n")
}

/// `- <friendly_name> (<entity_id>): <state>` plus selected attributes.
pub fn render_line(state: &DeviceState) -> String {
    let mut line = format!("- {} ({}): {}", state.friendly_name, state.id, state.state);

    let attrs: Vec<String> = CONTEXT_ATTRIBUTES
        .iter()
        .filter_map(|key| {
            let value = state.attributes.get(*key)?;
            let shown = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => return None,
                other => other.to_string(),
            };
            Some(format!("{key}: {shown}"))
        })
        .collect();

    if !attrs.is_empty() {
        line.push_str(&format!(" ({})", attrs.join(", ")));
    }
    line
}
