//! Weather lookup over Home Assistant `weather.*` entities.

use nexus_core::device::DeviceState;
use serde::{Deserialize, Serialize};

/// One forecast period as published in a weather entity's attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Overnight low
    #[serde(default)]
    pub templow: Option<f64>,
    #[serde(default)]
    pub precipitation: Option<f64>,
}

/// Current conditions projected from a weather entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub entity_id: String,
    pub friendly_name: String,
    /// The entity state, e.g. "sunny" or "rainy"
    pub condition: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_bearing: Option<f64>,
    pub precipitation: Option<f64>,
    pub forecast: Vec<ForecastEntry>,
}

impl WeatherReport {
    /// The first `days` forecast periods.
    pub fn forecast_days(&self, days: usize) -> &[ForecastEntry] {
        &self.forecast[..days.min(self.forecast.len())]
    }

    /// One-line summary, e.g. "Home: sunny, 21.5°, humidity 40%".
    pub fn summary(&self) -> String {
        let mut parts = vec![self.condition.clone()];
        if let Some(t) = self.temperature {
            parts.push(format!("{t}°"));
        }
        if let Some(h) = self.humidity {
            parts.push(format!("humidity {h}%"));
        }
        if let Some(w) = self.wind_speed {
            parts.push(format!("wind {w}"));
        }
        format!("{}: {}", self.friendly_name, parts.join(", "))
    }
}

/// Build a report from the first `weather.*` entity in `states`.
pub fn current_weather(states: &[DeviceState]) -> Option<WeatherReport> {
    let weather = states.iter().find(|s| s.domain == "weather")?;
    let number = |key: &str| weather.attributes.get(key).and_then(|v| v.as_f64());

    let forecast = weather
        .attributes
        .get("forecast")
        .and_then(|f| f.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    Some(WeatherReport {
        entity_id: weather.id.clone(),
        friendly_name: weather.friendly_name.clone(),
        condition: weather.state.clone(),
        temperature: number("temperature"),
        humidity: number("humidity"),
        pressure: number("pressure"),
        wind_speed: number("wind_speed"),
        wind_bearing: number("wind_bearing"),
        precipitation: number("precipitation"),
        forecast,
    })
}
