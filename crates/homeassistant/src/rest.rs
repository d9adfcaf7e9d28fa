//! Home Assistant REST client.
//!
//! Thin wrapper over `<api_url>/states`, `/services`, `/config` and the API
//! root, authenticated with a long-lived bearer token.

use async_trait::async_trait;
use nexus_config::HomeAssistantConfig;
use nexus_core::device::{DeviceApi, DeviceState};
use nexus_core::error::DeviceError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Basic facts about the connected instance, from `GET /config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
}

/// REST client implementing [`DeviceApi`].
pub struct HomeAssistantClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HomeAssistantClient {
    pub fn new(config: &HomeAssistantConfig) -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DeviceError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token(&self) -> Result<&str, DeviceError> {
        self.token.as_deref().ok_or_else(|| {
            DeviceError::NotConfigured(
                "No access token. Set HA_TOKEN or home_assistant.token in config.toml".into(),
            )
        })
    }

    /// GET `<base><path>` and decode the JSON body, mapping non-2xx to `Status`.
    async fn get_json(&self, path: &str) -> Result<serde_json::Value, DeviceError> {
        let token = self.token()?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;

        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| DeviceError::InvalidResponse(format!("GET {path}: {e}")))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DeviceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %message, "Home Assistant returned error");
        Err(DeviceError::Status {
            status: status.as_u16(),
            message,
        })
    }

    /// Current state of a single entity.
    pub async fn get_state(&self, entity_id: &str) -> Result<DeviceState, DeviceError> {
        let raw = self.get_json(&format!("/states/{entity_id}")).await?;
        DeviceState::from_ha_json(&raw).ok_or_else(|| {
            DeviceError::InvalidResponse(format!("state for {entity_id} has no entity_id"))
        })
    }

    /// Fetch `/config` to confirm the instance is reachable.
    pub async fn check_connection(&self) -> Result<ConnectionInfo, DeviceError> {
        let raw = self.get_json("/config").await?;
        serde_json::from_value(raw).map_err(|e| DeviceError::InvalidResponse(e.to_string()))
    }

    /// Whether the API root accepts the configured token.
    pub async fn token_valid(&self) -> Result<bool, DeviceError> {
        let token = self.token()?;
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl DeviceApi for HomeAssistantClient {
    async fn get_states(&self) -> Result<Vec<DeviceState>, DeviceError> {
        let raw = self.get_json("/states").await?;
        let items = raw
            .as_array()
            .ok_or_else(|| DeviceError::InvalidResponse("/states did not return a list".into()))?;

        let states: Vec<DeviceState> = items.iter().filter_map(DeviceState::from_ha_json).collect();
        debug!(entity_count = states.len(), "Fetched entity states");
        Ok(states)
    }

    async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, DeviceError> {
        let token = self.token()?;
        let url = format!("{}/services/{domain}/{service}", self.base_url);

        debug!(domain, service, "Calling service");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(data)
            .send()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;

        let response = Self::check_status(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| DeviceError::Network(e.to_string()))?;

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| DeviceError::InvalidResponse(e.to_string()))
    }
}
