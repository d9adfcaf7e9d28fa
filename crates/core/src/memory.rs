//! Memory trait — persistent key/value knowledge across queries.
//!
//! Memories are free-text values addressed by a unique key. Preferences are
//! memories stored under a `preference:` key prefix; interactions are
//! memories written by the pipeline after each answered query.

use crate::error::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key prefix marking a memory as a user preference.
pub const PREFERENCE_PREFIX: &str = "preference:";

/// A single memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique key for this memory
    pub key: String,

    /// The content of the memory
    pub value: String,

    /// Set for memories recorded through the preference surface
    #[serde(default)]
    pub is_preference: bool,

    /// When this key was first written
    pub created_at: DateTime<Utc>,

    /// When this key was last overwritten
    pub updated_at: DateTime<Utc>,

    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

impl MemoryItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>, is_preference: bool) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            value: value.into(),
            is_preference,
            created_at: now,
            updated_at: now,
            score: 0.0,
        }
    }
}

/// Key under which a named preference is stored.
pub fn preference_key(name: &str) -> String {
    format!("{PREFERENCE_PREFIX}{name}")
}

/// The memory surface the pipeline consumes.
///
/// Implementations: SQLite (production), in-memory (tests).
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Fetch a memory by exact key.
    async fn get_memory(&self, key: &str) -> Result<Option<MemoryItem>, MemoryError>;

    /// Insert or overwrite the memory at `key`.
    ///
    /// Overwriting keeps the original `created_at`.
    async fn save_memory(
        &self,
        key: &str,
        value: &str,
        is_preference: bool,
    ) -> Result<(), MemoryError>;

    /// Up to `limit` memories relevant to `query`, best first.
    async fn search_memories(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, MemoryError>;
}
