//! Device-control collaborator: Home Assistant entity states and services.

use crate::error::DeviceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A snapshot of one Home Assistant entity, refreshed on every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Entity id, e.g. `light.living_room`
    pub id: String,

    /// Display name; falls back to the id when HA has none
    pub friendly_name: String,

    /// The part of the id before the first `.`
    pub domain: String,

    pub state: String,

    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl DeviceState {
    pub fn new(
        id: impl Into<String>,
        friendly_name: Option<&str>,
        state: impl Into<String>,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let id = id.into();
        Self {
            domain: domain_of(&id).to_string(),
            friendly_name: friendly_name.unwrap_or(&id).to_string(),
            id,
            state: state.into(),
            attributes,
        }
    }

    /// Decode one element of HA's `/api/states` payload.
    ///
    /// Returns `None` when the object carries no `entity_id`.
    pub fn from_ha_json(raw: &serde_json::Value) -> Option<Self> {
        let id = raw.get("entity_id")?.as_str()?;
        let state = match raw.get("state") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let attributes = raw
            .get("attributes")
            .and_then(|a| a.as_object())
            .cloned()
            .unwrap_or_default();
        let friendly_name = attributes
            .get("friendly_name")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Some(Self::new(id, friendly_name.as_deref(), state, attributes))
    }
}

/// Domain prefix of an entity id (`"light.kitchen"` → `"light"`).
pub fn domain_of(entity_id: &str) -> &str {
    entity_id.split_once('.').map_or("", |(domain, _)| domain)
}

/// The Home Assistant surface the pipeline consumes.
///
/// Implementations must be safe for concurrent use; one client is shared
/// across all in-flight queries.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// All current entity states.
    async fn get_states(&self) -> Result<Vec<DeviceState>, DeviceError>;

    /// Invoke `domain.service` with the given service data.
    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, DeviceError>;
}
