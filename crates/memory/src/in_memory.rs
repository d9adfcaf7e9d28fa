//! In-memory store for tests and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use nexus_core::error::MemoryError;
use nexus_core::memory::{MemoryItem, MemoryStore};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A [`MemoryStore`] over a `Vec`, with the same upsert semantics as SQLite.
///
/// Search is a case-insensitive substring match on key or value, scored by
/// how many query words hit. An empty query returns the most recently
/// updated items.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    items: Arc<RwLock<Vec<MemoryItem>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// A copy of every stored item, in insertion order.
    pub async fn snapshot(&self) -> Vec<MemoryItem> {
        self.items.read().await.clone()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_memory(&self, key: &str) -> Result<Option<MemoryItem>, MemoryError> {
        let items = self.items.read().await;
        Ok(items.iter().find(|m| m.key == key).cloned())
    }

    async fn save_memory(&self, key: &str, value: &str, is_preference: bool) -> Result<(), MemoryError> {
        let mut items = self.items.write().await;
        match items.iter_mut().find(|m| m.key == key) {
            Some(existing) => {
                existing.value = value.to_string();
                existing.is_preference = is_preference;
                existing.updated_at = Utc::now();
            }
            None => items.push(MemoryItem::new(key, value, is_preference)),
        }
        Ok(())
    }

    async fn search_memories(&self, query: &str, limit: usize) -> Result<Vec<MemoryItem>, MemoryError> {
        let items = self.items.read().await;
        let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

        let mut results: Vec<MemoryItem> = if words.is_empty() {
            let mut all = items.clone();
            all.reverse();
            all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            all
        } else {
            let mut hits: Vec<MemoryItem> = items
                .iter()
                .filter_map(|m| {
                    let haystack = format!("{} {}", m.key, m.value).to_lowercase();
                    let matched = words.iter().filter(|w| haystack.contains(w.as_str())).count();
                    (matched > 0).then(|| {
                        let mut hit = m.clone();
                        hit.score = matched as f32 / words.len() as f32;
                        hit
                    })
                })
                .collect();
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hits
        };

        results.truncate(limit);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_get() {
        let store = InMemoryStore::new();
        store.save_memory("fact:car", "The car is blue", false).await.unwrap();

        let item = store.get_memory("fact:car").await.unwrap().unwrap();
        assert_eq!(item.value, "The car is blue");
        assert!(store.get_memory("fact:boat").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_value_keeps_created_at() {
        let store = InMemoryStore::new();
        store.save_memory("k", "one", false).await.unwrap();
        let first = store.get_memory("k").await.unwrap().unwrap();

        store.save_memory("k", "two", true).await.unwrap();
        let second = store.get_memory("k").await.unwrap().unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(second.value, "two");
        assert!(second.is_preference);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn search_scores_by_matched_words() {
        let store = InMemoryStore::new();
        store.save_memory("a", "Lights dim for movie night", false).await.unwrap();
        store.save_memory("b", "Movie posters in the hall", false).await.unwrap();
        store.save_memory("c", "Garage code", false).await.unwrap();

        let results = store.search_memories("movie lights", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "a");
        assert!(results[0].score > results[1].score);

        assert_eq!(store.search_memories("movie", 1).await.unwrap().len(), 1);
        assert!(store.search_memories("pool", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_query_returns_recent() {
        let store = InMemoryStore::new();
        store.save_memory("old", "x", false).await.unwrap();
        store.save_memory("new", "y", false).await.unwrap();

        let results = store.search_memories("", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "new");
    }
}
