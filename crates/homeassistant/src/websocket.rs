//! Home Assistant WebSocket event stream.
//!
//! Relays HA's own handshake: the server opens with `auth_required`, we
//! answer with the access token, and the server replies `auth_ok` or
//! `auth_invalid`. After that, `subscribe_events` commands carry
//! monotonically increasing ids and events arrive as `{"type":"event"}`
//! frames.

use futures::{SinkExt, StreamExt};
use nexus_config::HomeAssistantConfig;
use nexus_core::device::DeviceState;
use nexus_core::error::DeviceError;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Derive the WebSocket endpoint from a REST base URL.
///
/// `http://host/api` → `ws://host/api/websocket`; `https` maps to `wss`.
pub fn websocket_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/websocket")
}

/// An event delivered over the subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum HaEvent {
    /// An entity changed state. Either side is `None` when the entity was
    /// added or removed.
    StateChanged {
        entity_id: String,
        old_state: Option<DeviceState>,
        new_state: Option<DeviceState>,
    },
    /// Any other event type, passed through undecoded.
    Other {
        event_type: String,
        data: serde_json::Value,
    },
}

impl HaEvent {
    fn from_frame(event: &serde_json::Value) -> Option<Self> {
        let event_type = event.get("event_type")?.as_str()?.to_string();
        let data = event.get("data").cloned().unwrap_or_default();

        if event_type != "state_changed" {
            return Some(HaEvent::Other { event_type, data });
        }

        let entity_id = data.get("entity_id")?.as_str()?.to_string();
        let decode = |key: &str| data.get(key).and_then(DeviceState::from_ha_json);
        Some(HaEvent::StateChanged {
            old_state: decode("old_state"),
            new_state: decode("new_state"),
            entity_id,
        })
    }
}

/// An authenticated WebSocket connection to Home Assistant.
pub struct EventStream {
    ws: WsStream,
    next_id: u64,
    ha_version: Option<String>,
}

impl EventStream {
    /// Connect and complete the auth handshake.
    pub async fn connect(config: &HomeAssistantConfig) -> Result<Self, DeviceError> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DeviceError::NotConfigured("No access token for WebSocket".into()))?;

        let url = websocket_url(&config.api_url);
        info!(url = %url, "Connecting to Home Assistant WebSocket");

        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| DeviceError::WebSocket(e.to_string()))?;

        let mut stream = Self {
            ws,
            next_id: 1,
            ha_version: None,
        };
        stream.authenticate(token).await?;
        Ok(stream)
    }

    /// Version reported by the server during the handshake.
    pub fn ha_version(&self) -> Option<&str> {
        self.ha_version.as_deref()
    }

    async fn authenticate(&mut self, token: &str) -> Result<(), DeviceError> {
        let hello = self
            .read_json()
            .await?
            .ok_or_else(|| DeviceError::WebSocket("closed before auth_required".into()))?;

        match hello.get("type").and_then(|t| t.as_str()) {
            Some("auth_required") => {}
            other => {
                return Err(DeviceError::InvalidResponse(format!(
                    "expected auth_required, got {other:?}"
                )));
            }
        }

        let auth = serde_json::json!({"type": "auth", "access_token": token});
        self.send_json(&auth).await?;

        let reply = self
            .read_json()
            .await?
            .ok_or_else(|| DeviceError::WebSocket("closed during auth".into()))?;

        match reply.get("type").and_then(|t| t.as_str()) {
            Some("auth_ok") => {
                self.ha_version = reply
                    .get("ha_version")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                info!(ha_version = ?self.ha_version, "WebSocket authenticated");
                Ok(())
            }
            Some("auth_invalid") => {
                let message = reply
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("invalid access token");
                Err(DeviceError::AuthFailed(message.to_string()))
            }
            other => Err(DeviceError::InvalidResponse(format!(
                "unexpected auth reply {other:?}"
            ))),
        }
    }

    /// Subscribe to one event type, or to all events when `None`.
    ///
    /// Returns the command id used.
    pub async fn subscribe(&mut self, event_type: Option<&str>) -> Result<u64, DeviceError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut command = serde_json::json!({"id": id, "type": "subscribe_events"});
        if let Some(event_type) = event_type {
            command["event_type"] = serde_json::json!(event_type);
        }
        self.send_json(&command).await?;

        info!(id, event_type = ?event_type, "Subscribed to events");
        Ok(id)
    }

    /// Wait for the next event. `Ok(None)` means the server closed the stream.
    pub async fn next_event(&mut self) -> Result<Option<HaEvent>, DeviceError> {
        loop {
            let Some(frame) = self.read_json().await? else {
                return Ok(None);
            };

            match frame.get("type").and_then(|t| t.as_str()) {
                Some("event") => {
                    if let Some(event) = frame.get("event").and_then(HaEvent::from_frame) {
                        return Ok(Some(event));
                    }
                    debug!("Skipping undecodable event frame");
                }
                Some("result") => {
                    let success = frame.get("success").and_then(|s| s.as_bool());
                    if success == Some(false) {
                        warn!(id = ?frame.get("id"), error = ?frame.get("error"), "Command failed");
                    } else {
                        debug!(id = ?frame.get("id"), "Command acknowledged");
                    }
                }
                _ => {}
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<(), DeviceError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| DeviceError::WebSocket(e.to_string()))
    }

    async fn send_json(&mut self, value: &serde_json::Value) -> Result<(), DeviceError> {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .map_err(|e| DeviceError::WebSocket(e.to_string()))
    }

    /// Next JSON text frame. Non-text frames are skipped.
    async fn read_json(&mut self) -> Result<Option<serde_json::Value>, DeviceError> {
        while let Some(msg) = self.ws.next().await {
            let msg = msg.map_err(|e| DeviceError::WebSocket(e.to_string()))?;
            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str())
                        .map(Some)
                        .map_err(|e| DeviceError::InvalidResponse(e.to_string()));
                }
                Message::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }
}
