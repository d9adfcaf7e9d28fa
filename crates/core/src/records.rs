//! Persisted record types beyond plain memories.
//!
//! These mirror the tables the SQLite store keeps: settings, Home Assistant
//! connections, entity snapshots with state history, automations and
//! detected usage patterns. [`StoredRecord`] is the tagged union used by the
//! export path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryItem;

/// A single application setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of the last connection check against a saved instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Unknown => "unknown",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }

    /// Parse a stored value; anything unrecognized reads as `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "connected" => ConnectionStatus::Connected,
            "error" => ConnectionStatus::Error,
            _ => ConnectionStatus::Unknown,
        }
    }
}

/// A saved Home Assistant connection. Only the token hash is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaConnection {
    pub id: i64,
    pub instance_url: String,
    /// Hex SHA-256 of the long-lived access token
    pub token_hash: String,
    pub is_active: bool,
    pub status: ConnectionStatus,
    pub ha_version: Option<String>,
    pub location_name: Option<String>,
    pub last_connected: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The latest known snapshot of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub domain: String,
    pub friendly_name: String,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Entities the assistant should always consider
    #[serde(default)]
    pub is_important: bool,
    pub last_updated: DateTime<Utc>,
}

/// One row of an entity's state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHistoryEntry {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

/// A Home Assistant automation, user-defined or suggested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub triggers: serde_json::Value,
    pub conditions: serde_json::Value,
    pub actions: serde_json::Value,
    pub is_enabled: bool,
    /// Proposed by the assistant rather than written by the user
    pub is_suggested: bool,
    pub confidence: f64,
    pub last_triggered: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for saving a new automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAutomation {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub triggers: serde_json::Value,
    #[serde(default = "empty_array")]
    pub conditions: serde_json::Value,
    pub actions: serde_json::Value,
    #[serde(default)]
    pub is_suggested: bool,
    #[serde(default)]
    pub confidence: f64,
}

fn empty_array() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

/// A detected usage pattern with its rolling confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: i64,
    /// Unique name; re-detections update the existing row
    pub name: String,
    pub pattern_type: String,
    /// Entities involved in the pattern
    #[serde(default)]
    pub entities: Vec<String>,
    pub data: serde_json::Value,
    pub confidence: f64,
    pub times_detected: i64,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
}

/// Parameters for recording a pattern detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPattern {
    pub name: String,
    pub pattern_type: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub confidence: f64,
}

/// Any persisted record, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRecord {
    Setting(Setting),
    Entity(EntitySnapshot),
    Automation(Automation),
    Memory(MemoryItem),
    Pattern(Pattern),
}

impl StoredRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            StoredRecord::Setting(_) => "setting",
            StoredRecord::Entity(_) => "entity",
            StoredRecord::Automation(_) => "automation",
            StoredRecord::Memory(_) => "memory",
            StoredRecord::Pattern(_) => "pattern",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_record_is_tagged() {
        let record = StoredRecord::Setting(Setting {
            key: "theme".into(),
            value: "dark".into(),
            updated_at: Utc::now(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "setting");
        assert_eq!(json["key"], "theme");
        assert_eq!(record.kind(), "setting");
    }

    #[test]
    fn connection_status_parse() {
        assert_eq!(ConnectionStatus::parse("connected"), ConnectionStatus::Connected);
        assert_eq!(ConnectionStatus::parse("bogus"), ConnectionStatus::Unknown);
        assert_eq!(ConnectionStatus::Error.as_str(), "error");
    }

    #[test]
    fn new_automation_defaults() {
        let auto: NewAutomation = serde_json::from_str(
            r#"{"name":"Night","triggers":[{"platform":"time","at":"22:00"}],"actions":[]}"#,
        )
        .unwrap();
        assert_eq!(auto.conditions, serde_json::json!([]));
        assert!(!auto.is_suggested);
        assert_eq!(auto.confidence, 0.0);
    }
}
