//! SQLite store with FTS5 full-text search.
//!
//! One database file holds everything Nexus persists:
//! - `memories` + `memories_fts` — key/value memories, BM25-ranked search
//! - `settings` — application key/value settings
//! - `ha_connections` — saved Home Assistant instances (token hash only)
//! - `entities` + `entity_states` — latest snapshot per entity plus history
//! - `automations` — user-defined and suggested automations
//! - `patterns` — detected usage patterns with rolling confidence
//!
//! Triggers keep the FTS index in sync on insert/delete/update. The schema is
//! created idempotently on open.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use nexus_core::device::DeviceState;
use nexus_core::error::MemoryError;
use nexus_core::memory::{MemoryItem, MemoryStore};
use nexus_core::records::{
    Automation, ConnectionStatus, EntityHistoryEntry, EntitySnapshot, HaConnection,
    NewAutomation, NewPattern, Pattern, Setting, StoredRecord,
};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Hex SHA-256 of an access token, as stored in `ha_connections`.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// The production SQLite store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a store from a SQLite URL.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?;
        let store = Self::connect(options).await?;
        info!("SQLite store initialized at {url}");
        Ok(store)
    }

    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::Storage(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        let options = SqliteConnectOptions::new().filename(path);
        let store = Self::connect(options).await?;
        info!("SQLite store initialized at {}", path.display());
        Ok(store)
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, MemoryError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Create tables, the FTS5 virtual table, triggers and indexes.
    async fn create_schema(&self) -> Result<(), MemoryError> {
        const SCHEMA: &[(&str, &str)] = &[
            (
                "memories table",
                r#"
                CREATE TABLE IF NOT EXISTS memories (
                    iid           INTEGER PRIMARY KEY AUTOINCREMENT,
                    key           TEXT UNIQUE NOT NULL,
                    value         TEXT NOT NULL,
                    is_preference INTEGER NOT NULL DEFAULT 0,
                    embedding     BLOB,
                    created_at    TEXT NOT NULL,
                    updated_at    TEXT NOT NULL
                )
                "#,
            ),
            (
                "FTS5 table",
                r#"
                CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
                    key,
                    value,
                    content='memories',
                    content_rowid='iid',
                    tokenize='porter unicode61'
                )
                "#,
            ),
            (
                "insert trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
                    INSERT INTO memories_fts(rowid, key, value)
                    VALUES (new.iid, new.key, new.value);
                END
                "#,
            ),
            (
                "delete trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
                    INSERT INTO memories_fts(memories_fts, rowid, key, value)
                    VALUES ('delete', old.iid, old.key, old.value);
                END
                "#,
            ),
            (
                "update trigger",
                r#"
                CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
                    INSERT INTO memories_fts(memories_fts, rowid, key, value)
                    VALUES ('delete', old.iid, old.key, old.value);
                    INSERT INTO memories_fts(rowid, key, value)
                    VALUES (new.iid, new.key, new.value);
                END
                "#,
            ),
            (
                "updated_at index",
                "CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories(updated_at DESC)",
            ),
            (
                "settings table",
                r#"
                CREATE TABLE IF NOT EXISTS settings (
                    key        TEXT PRIMARY KEY,
                    value      TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "ha_connections table",
                r#"
                CREATE TABLE IF NOT EXISTS ha_connections (
                    id                INTEGER PRIMARY KEY AUTOINCREMENT,
                    instance_url      TEXT NOT NULL,
                    token_hash        TEXT NOT NULL,
                    is_active         INTEGER NOT NULL DEFAULT 1,
                    connection_status TEXT NOT NULL DEFAULT 'unknown',
                    ha_version        TEXT,
                    location_name     TEXT,
                    last_connected    TEXT,
                    created_at        TEXT NOT NULL
                )
                "#,
            ),
            (
                "entities table",
                r#"
                CREATE TABLE IF NOT EXISTS entities (
                    entity_id     TEXT PRIMARY KEY,
                    domain        TEXT NOT NULL,
                    friendly_name TEXT NOT NULL,
                    state         TEXT NOT NULL,
                    attributes    TEXT NOT NULL DEFAULT '{}',
                    is_important  INTEGER NOT NULL DEFAULT 0,
                    last_updated  TEXT NOT NULL
                )
                "#,
            ),
            (
                "entity_states table",
                r#"
                CREATE TABLE IF NOT EXISTS entity_states (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    entity_id   TEXT NOT NULL REFERENCES entities(entity_id) ON DELETE CASCADE,
                    state       TEXT NOT NULL,
                    attributes  TEXT NOT NULL DEFAULT '{}',
                    recorded_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "entity_states index",
                "CREATE INDEX IF NOT EXISTS idx_entity_states_entity ON entity_states(entity_id, recorded_at DESC)",
            ),
            (
                "automations table",
                r#"
                CREATE TABLE IF NOT EXISTS automations (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    name           TEXT NOT NULL,
                    description    TEXT NOT NULL DEFAULT '',
                    triggers       TEXT NOT NULL DEFAULT '[]',
                    conditions     TEXT NOT NULL DEFAULT '[]',
                    actions        TEXT NOT NULL DEFAULT '[]',
                    is_enabled     INTEGER NOT NULL DEFAULT 1,
                    is_suggested   INTEGER NOT NULL DEFAULT 0,
                    confidence     REAL NOT NULL DEFAULT 0.0,
                    last_triggered TEXT,
                    created_at     TEXT NOT NULL
                )
                "#,
            ),
            (
                "patterns table",
                r#"
                CREATE TABLE IF NOT EXISTS patterns (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    name           TEXT UNIQUE NOT NULL,
                    pattern_type   TEXT NOT NULL,
                    entities       TEXT NOT NULL DEFAULT '[]',
                    data           TEXT NOT NULL DEFAULT '{}',
                    confidence     REAL NOT NULL DEFAULT 0.0,
                    times_detected INTEGER NOT NULL DEFAULT 1,
                    first_detected TEXT NOT NULL,
                    last_detected  TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (what, sql) in SCHEMA {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::SchemaFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite schema ready");
        Ok(())
    }

    // --- Memories ---

    /// Every memory, most recently updated first.
    pub async fn all_memories(&self, preferences_only: bool) -> Result<Vec<MemoryItem>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM memories WHERE (?1 = 0 OR is_preference = 1) ORDER BY updated_at DESC, iid DESC",
        )
        .bind(preferences_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("List memories: {e}")))?;

        rows.iter().map(Self::row_to_memory).collect()
    }

    /// Delete a memory by key. Returns whether a row was removed.
    pub async fn delete_memory(&self, key: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Attach an embedding to an existing memory.
    pub async fn save_embedding(&self, key: &str, embedding: &[f32]) -> Result<bool, MemoryError> {
        let result = sqlx::query("UPDATE memories SET embedding = ?1 WHERE key = ?2")
            .bind(embedding_to_blob(embedding))
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("Embedding update failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Memories that carry an embedding, paired with the vector.
    pub async fn memories_with_embeddings(
        &self,
    ) -> Result<Vec<(MemoryItem, Vec<f32>)>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM memories WHERE embedding IS NOT NULL")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Embedding scan: {e}")))?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = col(row, "embedding")?;
                Ok((Self::row_to_memory(row)?, blob_to_embedding(&blob)))
            })
            .collect()
    }

    pub async fn memory_count(&self) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM memories")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = col(&row, "cnt")?;
        Ok(cnt as usize)
    }

    fn row_to_memory(row: &SqliteRow) -> Result<MemoryItem, MemoryError> {
        let created_at: String = col(row, "created_at")?;
        let updated_at: String = col(row, "updated_at")?;

        Ok(MemoryItem {
            key: col(row, "key")?,
            value: col(row, "value")?,
            is_preference: col(row, "is_preference")?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            score: 0.0,
        })
    }

    /// Build a safe FTS5 query from user text.
    ///
    /// Each word is stripped to alphanumerics, quoted, prefix-matched, and the
    /// terms are OR-ed so BM25 ranks memories sharing more words higher.
    fn sanitize_fts_query(text: &str) -> String {
        text.split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .collect::<String>()
            })
            .filter(|clean| !clean.is_empty())
            .map(|clean| format!("\"{clean}\"*"))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET setting: {e}")))?;

        row.map(|r| col(&r, "value")).transpose()
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Setting upsert failed: {e}")))?;

        Ok(())
    }

    pub async fn all_settings(&self) -> Result<Vec<Setting>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("List settings: {e}")))?;

        rows.iter()
            .map(|row| {
                let updated_at: String = col(row, "updated_at")?;
                Ok(Setting {
                    key: col(row, "key")?,
                    value: col(row, "value")?,
                    updated_at: parse_ts(&updated_at),
                })
            })
            .collect()
    }

    // --- Home Assistant connections ---

    /// Record a new active connection; older rows are deactivated.
    ///
    /// Only the SHA-256 of `token` is stored.
    pub async fn save_ha_connection(&self, instance_url: &str, token: &str) -> Result<i64, MemoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("BEGIN failed: {e}")))?;

        sqlx::query("UPDATE ha_connections SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("Deactivate connections: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO ha_connections (instance_url, token_hash, is_active, connection_status, created_at)
            VALUES (?1, ?2, 1, ?3, ?4)
            "#,
        )
        .bind(instance_url)
        .bind(hash_token(token))
        .bind(ConnectionStatus::Unknown.as_str())
        .bind(ts(Utc::now()))
        .execute(&mut *tx)
        .await
        .map_err(|e| MemoryError::Storage(format!("Insert connection: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("COMMIT failed: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    pub async fn active_ha_connection(&self) -> Result<Option<HaConnection>, MemoryError> {
        let row = sqlx::query(
            "SELECT * FROM ha_connections WHERE is_active = 1 ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Active connection: {e}")))?;

        row.as_ref().map(Self::row_to_connection).transpose()
    }

    /// Update the active connection after a check. A `Connected` status also
    /// stamps `last_connected`. Returns false when no connection is saved.
    pub async fn update_ha_connection_status(
        &self,
        status: ConnectionStatus,
        ha_version: Option<&str>,
        location_name: Option<&str>,
    ) -> Result<bool, MemoryError> {
        let last_connected = (status == ConnectionStatus::Connected).then(|| ts(Utc::now()));

        let result = sqlx::query(
            r#"
            UPDATE ha_connections SET
                connection_status = ?1,
                ha_version = COALESCE(?2, ha_version),
                location_name = COALESCE(?3, location_name),
                last_connected = COALESCE(?4, last_connected)
            WHERE is_active = 1
            "#,
        )
        .bind(status.as_str())
        .bind(ha_version)
        .bind(location_name)
        .bind(last_connected)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Connection status update: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether `token` matches the active connection's stored hash.
    pub async fn verify_ha_token(&self, token: &str) -> Result<bool, MemoryError> {
        Ok(self
            .active_ha_connection()
            .await?
            .is_some_and(|c| c.token_hash == hash_token(token)))
    }

    fn row_to_connection(row: &SqliteRow) -> Result<HaConnection, MemoryError> {
        let status: String = col(row, "connection_status")?;
        let last_connected: Option<String> = col(row, "last_connected")?;
        let created_at: String = col(row, "created_at")?;

        Ok(HaConnection {
            id: col(row, "id")?,
            instance_url: col(row, "instance_url")?,
            token_hash: col(row, "token_hash")?,
            is_active: col(row, "is_active")?,
            status: ConnectionStatus::parse(&status),
            ha_version: col(row, "ha_version")?,
            location_name: col(row, "location_name")?,
            last_connected: last_connected.as_deref().map(parse_ts),
            created_at: parse_ts(&created_at),
        })
    }

    // --- Entities ---

    /// Upsert the snapshot for `state.id` and append a history row.
    pub async fn save_entity(&self, state: &DeviceState, is_important: bool) -> Result<(), MemoryError> {
        let now = ts(Utc::now());
        let attributes = serde_json::to_string(&state.attributes)
            .map_err(|e| MemoryError::Storage(format!("Attributes serialization: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("BEGIN failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO entities (entity_id, domain, friendly_name, state, attributes, is_important, last_updated)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(entity_id) DO UPDATE SET
                domain = excluded.domain,
                friendly_name = excluded.friendly_name,
                state = excluded.state,
                attributes = excluded.attributes,
                is_important = excluded.is_important,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(&state.id)
        .bind(&state.domain)
        .bind(&state.friendly_name)
        .bind(&state.state)
        .bind(&attributes)
        .bind(is_important)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| MemoryError::Storage(format!("Entity upsert: {e}")))?;

        sqlx::query(
            "INSERT INTO entity_states (entity_id, state, attributes, recorded_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&state.id)
        .bind(&state.state)
        .bind(&attributes)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| MemoryError::Storage(format!("Entity history insert: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("COMMIT failed: {e}")))?;

        debug!(entity_id = %state.id, "Saved entity snapshot");
        Ok(())
    }

    /// Stored snapshots, optionally filtered by domain and importance.
    pub async fn entities(
        &self,
        domain: Option<&str>,
        important_only: bool,
    ) -> Result<Vec<EntitySnapshot>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM entities
            WHERE (?1 IS NULL OR domain = ?1) AND (?2 = 0 OR is_important = 1)
            ORDER BY entity_id
            "#,
        )
        .bind(domain)
        .bind(important_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("List entities: {e}")))?;

        rows.iter().map(Self::row_to_entity).collect()
    }

    pub async fn entity(&self, entity_id: &str) -> Result<Option<EntitySnapshot>, MemoryError> {
        let row = sqlx::query("SELECT * FROM entities WHERE entity_id = ?1")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET entity: {e}")))?;

        row.as_ref().map(Self::row_to_entity).transpose()
    }

    /// Recorded states for one entity, newest first.
    pub async fn entity_history(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<EntityHistoryEntry>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM entity_states WHERE entity_id = ?1 ORDER BY recorded_at DESC, id DESC LIMIT ?2",
        )
        .bind(entity_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("Entity history: {e}")))?;

        rows.iter()
            .map(|row| {
                let attributes: String = col(row, "attributes")?;
                let recorded_at: String = col(row, "recorded_at")?;
                Ok(EntityHistoryEntry {
                    entity_id: col(row, "entity_id")?,
                    state: col(row, "state")?,
                    attributes: json_map(&attributes),
                    recorded_at: parse_ts(&recorded_at),
                })
            })
            .collect()
    }

    fn row_to_entity(row: &SqliteRow) -> Result<EntitySnapshot, MemoryError> {
        let attributes: String = col(row, "attributes")?;
        let last_updated: String = col(row, "last_updated")?;

        Ok(EntitySnapshot {
            entity_id: col(row, "entity_id")?,
            domain: col(row, "domain")?,
            friendly_name: col(row, "friendly_name")?,
            state: col(row, "state")?,
            attributes: json_map(&attributes),
            is_important: col(row, "is_important")?,
            last_updated: parse_ts(&last_updated),
        })
    }

    // --- Automations ---

    pub async fn save_automation(&self, automation: &NewAutomation) -> Result<i64, MemoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO automations
                (name, description, triggers, conditions, actions, is_enabled, is_suggested, confidence, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8)
            "#,
        )
        .bind(&automation.name)
        .bind(&automation.description)
        .bind(automation.triggers.to_string())
        .bind(automation.conditions.to_string())
        .bind(automation.actions.to_string())
        .bind(automation.is_suggested)
        .bind(automation.confidence)
        .bind(ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("Automation insert: {e}")))?;

        Ok(result.last_insert_rowid())
    }

    pub async fn automations(&self, suggested_only: bool) -> Result<Vec<Automation>, MemoryError> {
        let rows = sqlx::query("SELECT * FROM automations WHERE (?1 = 0 OR is_suggested = 1) ORDER BY id")
            .bind(suggested_only)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("List automations: {e}")))?;

        rows.iter().map(Self::row_to_automation).collect()
    }

    /// Returns false when no automation has that id.
    pub async fn set_automation_enabled(&self, id: i64, enabled: bool) -> Result<bool, MemoryError> {
        let result = sqlx::query("UPDATE automations SET is_enabled = ?1 WHERE id = ?2")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("Automation update: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Stamp `last_triggered` with the current time.
    pub async fn record_automation_trigger(&self, id: i64) -> Result<bool, MemoryError> {
        let result = sqlx::query("UPDATE automations SET last_triggered = ?1 WHERE id = ?2")
            .bind(ts(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("Automation trigger: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_automation(row: &SqliteRow) -> Result<Automation, MemoryError> {
        let triggers: String = col(row, "triggers")?;
        let conditions: String = col(row, "conditions")?;
        let actions: String = col(row, "actions")?;
        let last_triggered: Option<String> = col(row, "last_triggered")?;
        let created_at: String = col(row, "created_at")?;

        Ok(Automation {
            id: col(row, "id")?,
            name: col(row, "name")?,
            description: col(row, "description")?,
            triggers: json_value(&triggers),
            conditions: json_value(&conditions),
            actions: json_value(&actions),
            is_enabled: col(row, "is_enabled")?,
            is_suggested: col(row, "is_suggested")?,
            confidence: col(row, "confidence")?,
            last_triggered: last_triggered.as_deref().map(parse_ts),
            created_at: parse_ts(&created_at),
        })
    }

    // --- Patterns ---

    /// Record a detection of `pattern`, keyed by name.
    ///
    /// A re-detection folds the new confidence into a mean weighted by
    /// `times_detected`: `(old * n + new) / (n + 1)`.
    pub async fn save_pattern(&self, pattern: &NewPattern) -> Result<i64, MemoryError> {
        let now = ts(Utc::now());
        let entities = serde_json::to_string(&pattern.entities)
            .map_err(|e| MemoryError::Storage(format!("Entities serialization: {e}")))?;
        let data = pattern.data.to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MemoryError::Storage(format!("BEGIN failed: {e}")))?;

        let existing = sqlx::query("SELECT id, confidence, times_detected FROM patterns WHERE name = ?1")
            .bind(&pattern.name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Pattern lookup: {e}")))?;

        let id = match existing {
            Some(row) => {
                let id: i64 = col(&row, "id")?;
                let old: f64 = col(&row, "confidence")?;
                let times: i64 = col(&row, "times_detected")?;
                let confidence = rolling_confidence(old, times, pattern.confidence);

                sqlx::query(
                    r#"
                    UPDATE patterns SET
                        pattern_type = ?1, entities = ?2, data = ?3, confidence = ?4,
                        times_detected = times_detected + 1, last_detected = ?5
                    WHERE id = ?6
                    "#,
                )
                .bind(&pattern.pattern_type)
                .bind(&entities)
                .bind(&data)
                .bind(confidence)
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| MemoryError::Storage(format!("Pattern update: {e}")))?;
                id
            }
            None => sqlx::query(
                r#"
                INSERT INTO patterns
                    (name, pattern_type, entities, data, confidence, times_detected, first_detected, last_detected)
                VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
                "#,
            )
            .bind(&pattern.name)
            .bind(&pattern.pattern_type)
            .bind(&entities)
            .bind(&data)
            .bind(pattern.confidence)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| MemoryError::Storage(format!("Pattern insert: {e}")))?
            .last_insert_rowid(),
        };

        tx.commit()
            .await
            .map_err(|e| MemoryError::Storage(format!("COMMIT failed: {e}")))?;

        Ok(id)
    }

    /// Patterns at or above `min_confidence`, most confident first.
    pub async fn patterns(
        &self,
        pattern_type: Option<&str>,
        min_confidence: f64,
    ) -> Result<Vec<Pattern>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM patterns
            WHERE confidence >= ?1 AND (?2 IS NULL OR pattern_type = ?2)
            ORDER BY confidence DESC, id
            "#,
        )
        .bind(min_confidence)
        .bind(pattern_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("List patterns: {e}")))?;

        rows.iter().map(Self::row_to_pattern).collect()
    }

    fn row_to_pattern(row: &SqliteRow) -> Result<Pattern, MemoryError> {
        let entities: String = col(row, "entities")?;
        let data: String = col(row, "data")?;
        let first_detected: String = col(row, "first_detected")?;
        let last_detected: String = col(row, "last_detected")?;

        Ok(Pattern {
            id: col(row, "id")?,
            name: col(row, "name")?,
            pattern_type: col(row, "pattern_type")?,
            entities: serde_json::from_str(&entities).unwrap_or_default(),
            data: json_value(&data),
            confidence: col(row, "confidence")?,
            times_detected: col(row, "times_detected")?,
            first_detected: parse_ts(&first_detected),
            last_detected: parse_ts(&last_detected),
        })
    }

    // --- Export ---

    /// Every persisted row as a tagged record.
    pub async fn export_records(&self) -> Result<Vec<StoredRecord>, MemoryError> {
        let mut records = Vec::new();
        records.extend(self.all_settings().await?.into_iter().map(StoredRecord::Setting));
        records.extend(self.entities(None, false).await?.into_iter().map(StoredRecord::Entity));
        records.extend(self.automations(false).await?.into_iter().map(StoredRecord::Automation));
        records.extend(self.all_memories(false).await?.into_iter().map(StoredRecord::Memory));
        records.extend(self.patterns(None, 0.0).await?.into_iter().map(StoredRecord::Pattern));
        Ok(records)
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_memory(&self, key: &str) -> Result<Option<MemoryItem>, MemoryError> {
        let row = sqlx::query("SELECT * FROM memories WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET by key: {e}")))?;

        row.as_ref().map(Self::row_to_memory).transpose()
    }

    async fn save_memory(&self, key: &str, value: &str, is_preference: bool) -> Result<(), MemoryError> {
        let now = ts(Utc::now());

        // A changed value invalidates any stored embedding.
        sqlx::query(
            r#"
            INSERT INTO memories (key, value, is_preference, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                is_preference = excluded.is_preference,
                updated_at = excluded.updated_at,
                embedding = CASE WHEN memories.value = excluded.value THEN memories.embedding ELSE NULL END
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(is_preference)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT failed: {e}")))?;

        debug!(key, "Stored memory");
        Ok(())
    }

    async fn search_memories(&self, query: &str, limit: usize) -> Result<Vec<MemoryItem>, MemoryError> {
        if query.trim().is_empty() {
            let rows = sqlx::query("SELECT * FROM memories ORDER BY updated_at DESC, iid DESC LIMIT ?1")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| MemoryError::QueryFailed(format!("Empty search: {e}")))?;

            return rows.iter().map(Self::row_to_memory).collect();
        }

        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            r#"
            SELECT m.*, bm25(memories_fts) AS rank
            FROM memories_fts f
            JOIN memories m ON m.iid = f.rowid
            WHERE memories_fts MATCH ?1
            ORDER BY rank
            LIMIT ?2
            "#,
        )
        .bind(&fts_query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter()
            .map(|row| {
                let mut item = Self::row_to_memory(row)?;
                // bm25() is negative, lower = better
                let rank: f64 = row.try_get("rank").unwrap_or(0.0);
                item.score = (-rank) as f32;
                Ok(item)
            })
            .collect()
    }
}

// --- Row helpers ---

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, MemoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| MemoryError::QueryFailed(format!("{name} column: {e}")))
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn json_value(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
}

fn json_map(s: &str) -> serde_json::Map<String, serde_json::Value> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Serialize an embedding vector to little-endian bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Mean of `times` prior observations averaging `old`, plus one at `new`.
fn rolling_confidence(old: f64, times: i64, new: f64) -> f64 {
    let times = times.max(0) as f64;
    (old * times + new) / (times + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn device(id: &str, state: &str) -> DeviceState {
        let mut attributes = serde_json::Map::new();
        attributes.insert("unit_of_measurement".into(), "°C".into());
        DeviceState::new(id, None, state, attributes)
    }

    // --- Memories ---

    #[tokio::test]
    async fn save_and_get_memory() {
        let db = test_store().await;
        db.save_memory("fact:pets", "The cat is called Miso", false)
            .await
            .unwrap();

        let item = db.get_memory("fact:pets").await.unwrap().unwrap();
        assert_eq!(item.value, "The cat is called Miso");
        assert!(!item.is_preference);
        assert!(db.get_memory("fact:missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_keeps_created_at() {
        let db = test_store().await;
        db.save_memory("preference:temperature", "20", true).await.unwrap();
        let first = db.get_memory("preference:temperature").await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.save_memory("preference:temperature", "22", true).await.unwrap();
        let second = db.get_memory("preference:temperature").await.unwrap().unwrap();

        assert_eq!(db.memory_count().await.unwrap(), 1);
        assert_eq!(second.value, "22");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn fts5_keyword_search() {
        let db = test_store().await;
        db.save_memory("a", "Movie night means dim living room lights", false)
            .await
            .unwrap();
        db.save_memory("b", "Garage door closes at ten", false).await.unwrap();
        db.save_memory("c", "The thermostat likes 21 degrees", false)
            .await
            .unwrap();

        let results = db.search_memories("lights", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "a");
        assert!(results[0].score > 0.0);

        let results = db.search_memories("garage thermostat", 5).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn search_after_update_uses_new_value() {
        let db = test_store().await;
        db.save_memory("k", "kitchen lights", false).await.unwrap();
        db.save_memory("k", "bedroom fan", false).await.unwrap();

        assert!(db.search_memories("kitchen", 5).await.unwrap().is_empty());
        assert_eq!(db.search_memories("fan", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_query_returns_most_recent() {
        let db = test_store().await;
        for i in 0..4 {
            db.save_memory(&format!("k{i}"), &format!("value {i}"), false)
                .await
                .unwrap();
        }

        let results = db.search_memories("  ", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "k3");
        assert_eq!(results[1].key, "k2");
    }

    #[tokio::test]
    async fn punctuation_only_query_matches_nothing() {
        let db = test_store().await;
        db.save_memory("k", "value", false).await.unwrap();
        assert!(db.search_memories("?!", 5).await.unwrap().is_empty());
    }

    #[test]
    fn sanitize_fts_query_basic() {
        assert_eq!(
            SqliteStore::sanitize_fts_query("dim the lights!"),
            r#""dim"* OR "the"* OR "lights"*"#
        );
        assert_eq!(SqliteStore::sanitize_fts_query("\"*()"), "");
    }

    #[tokio::test]
    async fn preferences_filter_and_delete() {
        let db = test_store().await;
        db.save_memory("preference:music", "jazz", true).await.unwrap();
        db.save_memory("interaction:1", "User asked: hi", false).await.unwrap();

        let prefs = db.all_memories(true).await.unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].key, "preference:music");
        assert_eq!(db.all_memories(false).await.unwrap().len(), 2);

        assert!(db.delete_memory("preference:music").await.unwrap());
        assert!(!db.delete_memory("preference:music").await.unwrap());
        assert!(db.search_memories("jazz", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_round_trip_and_invalidation() {
        let db = test_store().await;
        db.save_memory("k", "movie night", false).await.unwrap();
        assert!(db.save_embedding("k", &[0.25, -1.5, 3.0]).await.unwrap());
        assert!(!db.save_embedding("missing", &[1.0]).await.unwrap());

        let with = db.memories_with_embeddings().await.unwrap();
        assert_eq!(with.len(), 1);
        assert_eq!(with[0].1, vec![0.25, -1.5, 3.0]);

        // same value keeps the vector, a new value drops it
        db.save_memory("k", "movie night", false).await.unwrap();
        assert_eq!(db.memories_with_embeddings().await.unwrap().len(), 1);
        db.save_memory("k", "dinner time", false).await.unwrap();
        assert!(db.memories_with_embeddings().await.unwrap().is_empty());
    }

    // --- Settings ---

    #[tokio::test]
    async fn settings_upsert() {
        let db = test_store().await;
        assert!(db.get_setting("theme").await.unwrap().is_none());
        db.set_setting("theme", "light").await.unwrap();
        db.set_setting("theme", "dark").await.unwrap();
        db.set_setting("language", "en").await.unwrap();

        assert_eq!(db.get_setting("theme").await.unwrap().as_deref(), Some("dark"));
        let all = db.all_settings().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].key, "language");
    }

    // --- HA connections ---

    #[tokio::test]
    async fn ha_connection_stores_only_hash() {
        let db = test_store().await;
        assert!(db.active_ha_connection().await.unwrap().is_none());
        assert!(!db.verify_ha_token("anything").await.unwrap());

        db.save_ha_connection("http://old.local:8123", "old-token").await.unwrap();
        let id = db.save_ha_connection("http://ha.local:8123", "secret").await.unwrap();

        let active = db.active_ha_connection().await.unwrap().unwrap();
        assert_eq!(active.id, id);
        assert_eq!(active.instance_url, "http://ha.local:8123");
        assert_ne!(active.token_hash, "secret");
        assert_eq!(active.token_hash, hash_token("secret"));
        assert_eq!(active.token_hash.len(), 64);
        assert_eq!(active.status, ConnectionStatus::Unknown);

        assert!(db.verify_ha_token("secret").await.unwrap());
        assert!(!db.verify_ha_token("old-token").await.unwrap());
    }

    #[tokio::test]
    async fn ha_connection_status_update() {
        let db = test_store().await;
        assert!(!db
            .update_ha_connection_status(ConnectionStatus::Connected, None, None)
            .await
            .unwrap());

        db.save_ha_connection("http://ha.local:8123", "t").await.unwrap();
        assert!(db
            .update_ha_connection_status(ConnectionStatus::Connected, Some("2024.5.1"), Some("Home"))
            .await
            .unwrap());
        let active = db.active_ha_connection().await.unwrap().unwrap();
        assert_eq!(active.status, ConnectionStatus::Connected);
        assert_eq!(active.ha_version.as_deref(), Some("2024.5.1"));
        assert!(active.last_connected.is_some());

        db.update_ha_connection_status(ConnectionStatus::Error, None, None)
            .await
            .unwrap();
        let active = db.active_ha_connection().await.unwrap().unwrap();
        assert_eq!(active.status, ConnectionStatus::Error);
        assert_eq!(active.location_name.as_deref(), Some("Home"));
    }

    #[test]
    fn token_hash_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    // --- Entities ---

    #[tokio::test]
    async fn entity_snapshot_and_history() {
        let db = test_store().await;
        db.save_entity(&device("sensor.kitchen_temperature", "20.5"), false)
            .await
            .unwrap();
        db.save_entity(&device("sensor.kitchen_temperature", "21.0"), false)
            .await
            .unwrap();
        db.save_entity(&device("climate.living_room", "heat"), true)
            .await
            .unwrap();

        let snapshot = db.entity("sensor.kitchen_temperature").await.unwrap().unwrap();
        assert_eq!(snapshot.state, "21.0");
        assert_eq!(snapshot.domain, "sensor");
        assert_eq!(snapshot.attributes["unit_of_measurement"], "°C");

        let history = db.entity_history("sensor.kitchen_temperature", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].state, "21.0");
        assert_eq!(history[1].state, "20.5");
        assert_eq!(db.entity_history("sensor.kitchen_temperature", 1).await.unwrap().len(), 1);

        assert_eq!(db.entities(None, false).await.unwrap().len(), 2);
        let important = db.entities(None, true).await.unwrap();
        assert_eq!(important.len(), 1);
        assert_eq!(important[0].entity_id, "climate.living_room");
        assert_eq!(db.entities(Some("sensor"), false).await.unwrap().len(), 1);
        assert!(db.entities(Some("light"), false).await.unwrap().is_empty());
    }

    // --- Automations ---

    #[tokio::test]
    async fn automation_lifecycle() {
        let db = test_store().await;
        let manual = NewAutomation {
            name: "Porch light at sunset".into(),
            description: String::new(),
            triggers: serde_json::json!([{"platform": "sun", "event": "sunset"}]),
            conditions: serde_json::json!([]),
            actions: serde_json::json!([{"service": "light.turn_on", "entity_id": "light.porch"}]),
            is_suggested: false,
            confidence: 0.0,
        };
        let suggested = NewAutomation {
            name: "Heating before wake-up".into(),
            is_suggested: true,
            confidence: 0.8,
            ..manual.clone()
        };

        let id = db.save_automation(&manual).await.unwrap();
        db.save_automation(&suggested).await.unwrap();

        let all = db.automations(false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].triggers[0]["event"], "sunset");
        assert!(all[0].is_enabled);
        assert!(all[0].last_triggered.is_none());

        let only = db.automations(true).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "Heating before wake-up");

        assert!(db.set_automation_enabled(id, false).await.unwrap());
        assert!(db.record_automation_trigger(id).await.unwrap());
        assert!(!db.set_automation_enabled(999, true).await.unwrap());

        let first = &db.automations(false).await.unwrap()[0];
        assert!(!first.is_enabled);
        assert!(first.last_triggered.is_some());
    }

    // --- Patterns ---

    fn pattern(name: &str, confidence: f64) -> NewPattern {
        NewPattern {
            name: name.into(),
            pattern_type: "time_based".into(),
            entities: vec!["light.kitchen".into()],
            data: serde_json::json!({"hour": 7}),
            confidence,
        }
    }

    #[tokio::test]
    async fn pattern_confidence_is_weighted_mean() {
        let db = test_store().await;
        let id = db.save_pattern(&pattern("morning kitchen", 0.9)).await.unwrap();
        let again = db.save_pattern(&pattern("morning kitchen", 0.3)).await.unwrap();
        assert_eq!(id, again);
        db.save_pattern(&pattern("morning kitchen", 0.6)).await.unwrap();

        let patterns = db.patterns(None, 0.0).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].times_detected, 3);
        assert!((patterns[0].confidence - 0.6).abs() < 1e-9);
        assert_eq!(patterns[0].entities, vec!["light.kitchen".to_string()]);
    }

    #[tokio::test]
    async fn patterns_filtered_and_ordered() {
        let db = test_store().await;
        db.save_pattern(&pattern("low", 0.2)).await.unwrap();
        db.save_pattern(&pattern("high", 0.9)).await.unwrap();
        let mut other = pattern("other", 0.5);
        other.pattern_type = "sequence".into();
        db.save_pattern(&other).await.unwrap();

        let all = db.patterns(None, 0.0).await.unwrap();
        let names: Vec<_> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["high", "other", "low"]);

        assert_eq!(db.patterns(None, 0.4).await.unwrap().len(), 2);
        let sequence = db.patterns(Some("sequence"), 0.0).await.unwrap();
        assert_eq!(sequence.len(), 1);
        assert_eq!(sequence[0].name, "other");
    }

    #[test]
    fn rolling_confidence_math() {
        assert!((rolling_confidence(0.9, 1, 0.3) - 0.6).abs() < 1e-9);
        assert!((rolling_confidence(0.6, 2, 0.6) - 0.6).abs() < 1e-9);
        assert!((rolling_confidence(0.0, 0, 0.7) - 0.7).abs() < 1e-9);
    }

    // --- Export ---

    #[tokio::test]
    async fn export_covers_every_kind() {
        let db = test_store().await;
        db.set_setting("theme", "dark").await.unwrap();
        db.save_entity(&device("sensor.a", "1"), false).await.unwrap();
        db.save_automation(&NewAutomation {
            name: "n".into(),
            description: String::new(),
            triggers: serde_json::json!([]),
            conditions: serde_json::json!([]),
            actions: serde_json::json!([]),
            is_suggested: false,
            confidence: 0.0,
        })
        .await
        .unwrap();
        db.save_memory("k", "v", false).await.unwrap();
        db.save_pattern(&pattern("p", 0.5)).await.unwrap();

        let records = db.export_records().await.unwrap();
        let kinds: Vec<_> = records.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec!["setting", "entity", "automation", "memory", "pattern"]);
    }

    #[tokio::test]
    async fn open_creates_file_and_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("nexus.sqlite");
        {
            let db = SqliteStore::open(&path).await.unwrap();
            db.save_memory("k", "persisted", false).await.unwrap();
        }
        assert!(path.exists());

        let db = SqliteStore::open(&path).await.unwrap();
        assert_eq!(db.get_memory("k").await.unwrap().unwrap().value, "persisted");
    }
}
