//! The prompt-to-action pipeline.
//!
//! One call to [`NexusAgent::process`] walks a fixed sequence of stages:
//!
//! ```text
//! Received → ContextBuilt → PromptSent → ResponseReceived
//!          → ActionsDispatched → Sanitized → Recorded → Returned
//! ```
//!
//! The only early exit is `Failed`, taken when the completion call errors.
//! Device-state and recall failures degrade to empty inputs; recording
//! failures are logged and dropped.

use crate::context;
use crate::directive;
use crate::dispatch::{self, CommandResult};
use crate::prompt::{self, MAX_PROMPT_MEMORIES};
use chrono::{DateTime, SecondsFormat, Utc};
use nexus_config::AppConfig;
use nexus_core::device::{DeviceApi, DeviceState};
use nexus_core::memory::{MemoryItem, MemoryStore};
use nexus_core::provider::{Provider, ProviderRequest};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reply text when the completion service cannot be reached.
pub const UPSTREAM_FAILURE_MESSAGE: &str =
    "I'm sorry, I couldn't reach the AI service right now. Please try again in a moment.";

/// Key prefix for recorded interactions.
pub const INTERACTION_PREFIX: &str = "interaction:";

/// Where a query ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    ContextBuilt,
    PromptSent,
    ResponseReceived,
    ActionsDispatched,
    Sanitized,
    Recorded,
    Returned,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::ContextBuilt => "context_built",
            PipelineStage::PromptSent => "prompt_sent",
            PipelineStage::ResponseReceived => "response_received",
            PipelineStage::ActionsDispatched => "actions_dispatched",
            PipelineStage::Sanitized => "sanitized",
            PipelineStage::Recorded => "recorded",
            PipelineStage::Returned => "returned",
            PipelineStage::Failed => "failed",
        }
    }
}

/// Model and pipeline knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_context_entries: usize,
    pub recall_limit: usize,
    pub record_interactions: bool,
    /// Added to the prompt's extra context as `"location"`
    pub location: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: Some(500),
            max_context_entries: context::DEFAULT_MAX_ENTRIES,
            recall_limit: MAX_PROMPT_MEMORIES,
            record_interactions: true,
            location: None,
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: Some(config.llm.max_tokens),
            max_context_entries: config.agent.max_context_entries,
            recall_limit: config.agent.recall_limit,
            record_interactions: config.agent.record_interactions,
            location: config.agent.location.clone(),
        }
    }
}

/// Result of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    /// Sanitized text for the user
    pub text: String,
    /// One entry per well-formed directive, in dispatch order
    pub commands: Vec<CommandResult>,
    /// `Returned` on success, `Failed` when the completion call errored
    pub stage: PipelineStage,
}

impl AgentReply {
    pub fn is_failure(&self) -> bool {
        self.stage == PipelineStage::Failed
    }
}

/// The Nexus assistant: context, prompt, completion, actions, reply.
pub struct NexusAgent {
    provider: Arc<dyn Provider>,
    devices: Arc<dyn DeviceApi>,
    memory: Arc<dyn MemoryStore>,
    settings: AgentSettings,
}

impl NexusAgent {
    pub fn new(
        provider: Arc<dyn Provider>,
        devices: Arc<dyn DeviceApi>,
        memory: Arc<dyn MemoryStore>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            provider,
            devices,
            memory,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Answer `query`, returning only the reply text.
    pub async fn process_query(
        &self,
        query: &str,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> String {
        self.process(query, extra).await.text
    }

    /// Run the full pipeline for one query.
    pub async fn process(
        &self,
        query: &str,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> AgentReply {
        info!(provider = self.provider.name(), "Processing query");
        stage(PipelineStage::Received);

        // ── Context ──
        let states = self.fetch_states().await;
        let context_text = context::assemble(&states, query, self.settings.max_context_entries);
        let memories = self.recall(query).await;
        let extra = self.merge_extra(extra);
        stage(PipelineStage::ContextBuilt);

        // ── Completion ──
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages: prompt::build(query, &context_text, &memories, extra.as_ref()),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        stage(PipelineStage::PromptSent);

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Completion failed");
                stage(PipelineStage::Failed);
                return AgentReply {
                    text: UPSTREAM_FAILURE_MESSAGE.to_string(),
                    commands: Vec::new(),
                    stage: PipelineStage::Failed,
                };
            }
        };
        stage(PipelineStage::ResponseReceived);

        // ── Actions ──
        let commands = directive::extract(&response.content);
        let results = dispatch::dispatch(&commands, self.devices.as_ref()).await;
        if !results.is_empty() {
            let failed = results.iter().filter(|r| !r.success).count();
            info!(total = results.len(), failed, "Dispatched actions");
        }
        stage(PipelineStage::ActionsDispatched);

        let text = directive::sanitize(&response.content);
        stage(PipelineStage::Sanitized);

        self.record(query, &text).await;
        stage(PipelineStage::Recorded);

        stage(PipelineStage::Returned);
        AgentReply {
            text,
            commands: results,
            stage: PipelineStage::Returned,
        }
    }

    async fn fetch_states(&self) -> Vec<DeviceState> {
        match self.devices.get_states().await {
            Ok(states) => {
                debug!(entity_count = states.len(), "Fetched device states");
                states
            }
            Err(e) => {
                warn!(error = %e, "Could not fetch device states, continuing without them");
                Vec::new()
            }
        }
    }

    async fn recall(&self, query: &str) -> Vec<MemoryItem> {
        let limit = self.settings.recall_limit.min(MAX_PROMPT_MEMORIES);
        if limit == 0 {
            return Vec::new();
        }

        match self.memory.search_memories(query, limit).await {
            Ok(items) => {
                if !items.is_empty() {
                    debug!(count = items.len(), "Recalled memories for context");
                }
                items
            }
            Err(e) => {
                warn!(error = %e, "Memory recall failed");
                Vec::new()
            }
        }
    }

    /// Caller-supplied extra context, plus the configured location unless
    /// the caller already set one.
    fn merge_extra(
        &self,
        extra: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        let Some(location) = &self.settings.location else {
            return extra;
        };
        let mut extra = extra.unwrap_or_default();
        extra
            .entry("location")
            .or_insert_with(|| serde_json::Value::String(location.clone()));
        Some(extra)
    }

    async fn record(&self, query: &str, answer: &str) {
        if !self.settings.record_interactions {
            return;
        }

        let key = interaction_key(query, Utc::now());
        match self
            .memory
            .save_memory(&key, &interaction_value(query, answer), false)
            .await
        {
            Ok(()) => debug!(key = %key, "Recorded interaction"),
            Err(e) => warn!(error = %e, "Failed to record interaction"),
        }
    }
}

fn stage(stage: PipelineStage) {
    debug!(stage = stage.as_str(), "Pipeline stage");
}

/// `interaction:<RFC 3339 UTC>:<first 8 hex chars of SHA-256(query)>`
pub fn interaction_key(query: &str, at: DateTime<Utc>) -> String {
    let digest = hex::encode(Sha256::digest(query.as_bytes()));
    format!(
        "{INTERACTION_PREFIX}{}:{}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        &digest[..8]
    )
}

pub fn interaction_value(query: &str, answer: &str) -> String {
    format!("User asked: {query}\nAssistant answered: {answer}")
}
