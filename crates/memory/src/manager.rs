//! Memory manager: SQLite persistence plus optional semantic recall.
//!
//! With an embedding provider attached, every saved memory gets a vector and
//! searches rank by cosine similarity. Without one, or whenever embedding
//! fails, search falls back to the store's full-text ranking.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use nexus_core::device::DeviceState;
use nexus_core::error::MemoryError;
use nexus_core::memory::{MemoryItem, MemoryStore, PREFERENCE_PREFIX, preference_key};
use nexus_core::provider::{EmbeddingRequest, Provider};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::sqlite::SqliteStore;
use crate::vector::rank_by_similarity;

/// Key prefix for tracked entity states.
pub const ENTITY_STATE_PREFIX: &str = "entity_state:";

pub struct MemoryManager {
    store: Arc<SqliteStore>,
    embedder: Option<Arc<dyn Provider>>,
    embedding_model: String,
}

impl MemoryManager {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            embedder: None,
            embedding_model: String::new(),
        }
    }

    /// Enable semantic recall through `provider`'s embeddings endpoint.
    pub fn with_embedder(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.embedder = Some(provider);
        self.embedding_model = model.into();
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn is_semantic(&self) -> bool {
        self.embedder.is_some()
    }

    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, MemoryError> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };

        let response = embedder
            .embed(EmbeddingRequest {
                model: self.embedding_model.clone(),
                inputs: vec![text.to_string()],
            })
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .map(Some)
            .ok_or_else(|| MemoryError::EmbeddingFailed("provider returned no vectors".into()))
    }

    /// Write a memory, then attach an embedding if an embedder is configured.
    ///
    /// Embedding failures are logged; the row is kept either way.
    pub async fn save(&self, key: &str, value: &str, is_preference: bool) -> Result<(), MemoryError> {
        self.store.save_memory(key, value, is_preference).await?;

        match self.embed(value).await {
            Ok(Some(vector)) => {
                self.store.save_embedding(key, &vector).await?;
                debug!(key, dims = vector.len(), "Stored memory embedding");
            }
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "Embedding failed, memory saved without vector"),
        }
        Ok(())
    }

    /// Up to `limit` memories relevant to `query`.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryItem>, MemoryError> {
        if self.embedder.is_some() && !query.trim().is_empty() {
            match self.semantic_search(query, limit).await {
                Ok(results) if !results.is_empty() => return Ok(results),
                Ok(_) => debug!("No embedded memories matched, using keyword search"),
                Err(e) => warn!(error = %e, "Semantic search failed, using keyword search"),
            }
        }
        self.store.search_memories(query, limit).await
    }

    async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<MemoryItem>, MemoryError> {
        let Some(query_vector) = self.embed(query).await? else {
            return Ok(vec![]);
        };
        let candidates = self.store.memories_with_embeddings().await?;
        Ok(rank_by_similarity(candidates, &query_vector, limit, 0.0))
    }

    pub async fn save_preference(&self, name: &str, value: &str) -> Result<(), MemoryError> {
        self.save(&preference_key(name), value, true).await
    }

    pub async fn get_preference(&self, name: &str) -> Result<Option<String>, MemoryError> {
        Ok(self
            .store
            .get_memory(&preference_key(name))
            .await?
            .map(|m| m.value))
    }

    /// Every preference as `(name, value)`, most recently updated first.
    pub async fn all_preferences(&self) -> Result<Vec<(String, String)>, MemoryError> {
        Ok(self
            .store
            .all_memories(true)
            .await?
            .into_iter()
            .map(|m| {
                let name = m
                    .key
                    .strip_prefix(PREFERENCE_PREFIX)
                    .unwrap_or(&m.key)
                    .to_string();
                (name, m.value)
            })
            .collect())
    }

    /// Remember an observed entity state. Returns the memory key.
    pub async fn track_entity(&self, state: &DeviceState) -> Result<String, MemoryError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let key = format!("{ENTITY_STATE_PREFIX}{}:{now}", state.id);
        let value = serde_json::json!({
            "entity_id": state.id,
            "friendly_name": state.friendly_name,
            "state": state.state,
            "attributes": state.attributes,
            "timestamp": now,
        })
        .to_string();

        self.save(&key, &value, false).await?;
        Ok(key)
    }
}

#[async_trait]
impl MemoryStore for MemoryManager {
    fn name(&self) -> &str {
        if self.is_semantic() { "sqlite+embeddings" } else { "sqlite" }
    }

    async fn get_memory(&self, key: &str) -> Result<Option<MemoryItem>, MemoryError> {
        self.store.get_memory(key).await
    }

    async fn save_memory(&self, key: &str, value: &str, is_preference: bool) -> Result<(), MemoryError> {
        self.save(key, value, is_preference).await
    }

    async fn search_memories(&self, query: &str, limit: usize) -> Result<Vec<MemoryItem>, MemoryError> {
        self.search(query, limit).await
    }
}
