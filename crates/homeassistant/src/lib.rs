//! # Nexus Home Assistant
//!
//! The device-control collaborator:
//! - [`HomeAssistantClient`] — REST client implementing `nexus_core::DeviceApi`
//! - [`EventStream`] — authenticated WebSocket subscription to HA events
//! - [`current_weather`] — weather report from the first `weather.*` entity

pub mod rest;
pub mod weather;
pub mod websocket;

pub use rest::{ConnectionInfo, HomeAssistantClient};
pub use weather::{ForecastEntry, WeatherReport, current_weather};
pub use websocket::{EventStream, HaEvent, websocket_url};
