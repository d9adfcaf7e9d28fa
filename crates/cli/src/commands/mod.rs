//! Subcommand implementations and the wiring they share.

pub mod action;
pub mod ask;
pub mod automations;
pub mod doctor;
pub mod entities;
pub mod export;
pub mod ha;
pub mod memory;
pub mod onboard;
pub mod patterns;
pub mod weather;

use nexus_config::AppConfig;
use nexus_homeassistant::HomeAssistantClient;
use nexus_memory::{MemoryManager, SqliteStore};
use nexus_providers::OpenAiCompatProvider;
use std::sync::Arc;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub(crate) fn load_config() -> CliResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub(crate) async fn open_store(config: &AppConfig) -> CliResult<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.storage.path)
        .await
        .map_err(|e| format!("Failed to open {}: {e}", config.storage.path.display()))?;
    Ok(Arc::new(store))
}

/// Memory manager over `store`, with embeddings when semantic recall is on
/// and an API key is available.
pub(crate) fn memory_manager(config: &AppConfig, store: Arc<SqliteStore>) -> MemoryManager {
    let manager = MemoryManager::new(store);
    if !config.llm.semantic_recall {
        return manager;
    }

    match OpenAiCompatProvider::from_config(&config.llm) {
        Ok(provider) => manager.with_embedder(Arc::new(provider), config.llm.embedding_model.clone()),
        Err(e) => {
            tracing::warn!("Semantic recall disabled: {e}");
            manager
        }
    }
}

pub(crate) fn ha_client(config: &AppConfig) -> CliResult<HomeAssistantClient> {
    if !config.home_assistant.has_token() {
        return Err(format!(
            "No Home Assistant token. Set HA_TOKEN or add home_assistant.token to {}",
            AppConfig::config_dir().join("config.toml").display()
        )
        .into());
    }
    Ok(HomeAssistantClient::new(&config.home_assistant)?)
}

/// Device client for the assistant. Without a token every call fails with
/// `NotConfigured`, which the pipeline treats as an empty home.
pub(crate) fn device_client(config: &AppConfig) -> CliResult<HomeAssistantClient> {
    if !config.home_assistant.has_token() {
        tracing::warn!("No Home Assistant token; answering without device state");
    }
    Ok(HomeAssistantClient::new(&config.home_assistant)?)
}

/// Parse a command-line JSON argument that must be an object.
pub(crate) fn json_object(raw: &str, what: &str) -> CliResult<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(format!("{what} must be a JSON object").into()),
        Err(e) => Err(format!("Invalid JSON for {what}: {e}").into()),
    }
}

/// Parse a command-line JSON argument that must be an array.
pub(crate) fn json_array(raw: &str, what: &str) -> CliResult<serde_json::Value> {
    match serde_json::from_str(raw) {
        Ok(value @ serde_json::Value::Array(_)) => Ok(value),
        Ok(_) => Err(format!("{what} must be a JSON array").into()),
        Err(e) => Err(format!("Invalid JSON for {what}: {e}").into()),
    }
}

/// Cut `text` to at most `max` characters, marking the cut.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}
