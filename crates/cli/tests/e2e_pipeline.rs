//! End-to-end tests for the Nexus pipeline.
//!
//! A fake Home Assistant (axum) serves states and records service calls;
//! the real REST client, SQLite store and memory manager sit in between;
//! only the LLM is scripted.

use std::sync::{Arc, Mutex};

use axum::Json;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use nexus_agent::pipeline::{INTERACTION_PREFIX, UPSTREAM_FAILURE_MESSAGE};
use nexus_agent::suggest::{MIN_SUGGESTION_CONFIDENCE, reload_automations, suggest_automations};
use nexus_agent::{AgentSettings, NexusAgent, PipelineStage};
use nexus_config::HomeAssistantConfig;
use nexus_core::device::DeviceState;
use nexus_core::error::ProviderError;
use nexus_core::memory::MemoryStore;
use nexus_core::provider::{Provider, ProviderRequest, ProviderResponse};
use nexus_core::records::NewPattern;
use nexus_homeassistant::HomeAssistantClient;
use nexus_memory::{MemoryManager, SqliteStore};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A provider that answers once from a script and records what it was sent.
struct ScriptedProvider {
    reply: Mutex<Option<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn single_text(text: &str) -> Self {
        Self::scripted(Ok(text.to_string()))
    }

    fn failing(error: ProviderError) -> Self {
        Self::scripted(Err(error))
    }

    fn scripted(reply: Result<String, ProviderError>) -> Self {
        Self {
            reply: Mutex::new(Some(reply)),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let reply = self
            .reply
            .lock()
            .unwrap()
            .take()
            .expect("ScriptedProvider called more than once")?;
        Ok(ProviderResponse {
            content: reply,
            model,
            usage: None,
        })
    }
}

// ── Fake Home Assistant ──────────────────────────────────────────────────

type Calls = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

fn states() -> serde_json::Value {
    serde_json::json!([
        {
            "entity_id": "light.living_room",
            "state": "on",
            "attributes": {"friendly_name": "Living Room Light", "brightness": 200}
        },
        {
            "entity_id": "light.kitchen",
            "state": "off",
            "attributes": {"friendly_name": "Kitchen Light"}
        },
        {
            "entity_id": "climate.hallway",
            "state": "heat",
            "attributes": {"friendly_name": "Hallway Thermostat", "temperature": 20}
        },
        {
            "entity_id": "switch.garage_door",
            "state": "off",
            "attributes": {"friendly_name": "Garage Door"}
        }
    ])
}

async fn fake_home_assistant() -> (HomeAssistantConfig, Calls) {
    let calls: Calls = Arc::default();

    let router = axum::Router::new()
        .route("/api/states", get(|| async { Json(states()) }))
        .route(
            "/api/services/{domain}/{service}",
            post(
                |State(calls): State<Calls>,
                 Path((domain, service)): Path<(String, String)>,
                 Json(body): Json<serde_json::Value>| async move {
                    calls.lock().unwrap().push((format!("{domain}.{service}"), body));
                    Json(serde_json::json!([]))
                },
            ),
        )
        .with_state(calls.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (
        HomeAssistantConfig::from_instance_url(&format!("http://{addr}"), "e2e-token"),
        calls,
    )
}

async fn memory() -> Arc<MemoryManager> {
    let store = SqliteStore::new("sqlite::memory:").await.unwrap();
    Arc::new(MemoryManager::new(Arc::new(store)))
}

fn agent(
    provider: Arc<ScriptedProvider>,
    ha: &HomeAssistantConfig,
    memory: Arc<MemoryManager>,
) -> NexusAgent {
    let devices = HomeAssistantClient::new(ha).unwrap();
    NexusAgent::new(provider, Arc::new(devices), memory, AgentSettings::default())
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn turns_off_a_light_and_remembers_the_exchange() {
    let (ha, calls) = fake_home_assistant().await;
    let memory = memory().await;
    let provider = Arc::new(ScriptedProvider::single_text(
        "Sure. [ACTION:light.turn_off:{\"entity_id\": \"light.living_room\"}]",
    ));
    let agent = agent(provider.clone(), &ha, memory.clone());

    let reply = agent.process("turn off the living room light", None).await;

    assert_eq!(reply.stage, PipelineStage::Returned);
    assert_eq!(reply.text, "Sure. I've turned off light.living_room.");
    assert_eq!(reply.commands.len(), 1);
    assert!(reply.commands[0].success);

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "light.turn_off");
    assert_eq!(calls[0].1["entity_id"], "light.living_room");

    // The prompt carried the matching entity from the live state list.
    let request = &provider.requests()[0];
    assert_eq!(request.messages.len(), 3);
    assert!(
        request.messages[1]
            .content
            .contains("- Living Room Light (light.living_room): on (brightness: 200)")
    );
    assert!(request.messages[1].content.contains("climate.hallway"));
    assert!(!request.messages[1].content.contains("switch.garage_door"));

    // And the exchange landed in SQLite.
    let stored = memory.store().all_memories(false).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].key.starts_with(INTERACTION_PREFIX));
    assert_eq!(
        stored[0].value,
        "User asked: turn off the living room light\nAssistant answered: Sure. I've turned off light.living_room."
    );
}

#[tokio::test]
async fn multiple_actions_run_in_order() {
    let (ha, calls) = fake_home_assistant().await;
    let provider = Arc::new(ScriptedProvider::single_text(
        "[ACTION:light.turn_on:{\"entity_id\": \"light.kitchen\"}] \
         [ACTION:climate.set_temperature:{\"entity_id\": \"climate.hallway\", \"temperature\": 21}]",
    ));
    let agent = agent(provider, &ha, memory().await);

    let reply = agent.process("kitchen light on and hallway to 21", None).await;

    assert_eq!(
        reply.text,
        "I've turned on light.kitchen. I've set climate.hallway to 21 degrees."
    );
    let names: Vec<String> = calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names, ["light.turn_on", "climate.set_temperature"]);
}

#[tokio::test]
async fn recalled_memories_reach_the_prompt() {
    let (ha, _calls) = fake_home_assistant().await;
    let memory = memory().await;
    memory
        .save_preference("kitchen", "kitchen lights should be warm white")
        .await
        .unwrap();

    let provider = Arc::new(ScriptedProvider::single_text("Done."));
    let agent = agent(provider.clone(), &ha, memory);

    agent.process("kitchen lights please", None).await;

    let context = &provider.requests()[0].messages[1].content;
    assert!(context.contains("Relevant memories:"));
    assert!(context.contains("- kitchen lights should be warm white"));
}

#[tokio::test]
async fn malformed_directive_is_left_visible_and_not_dispatched() {
    let (ha, calls) = fake_home_assistant().await;
    let raw = "Trying [ACTION:light.turn_on:{entity_id: light.kitchen}]";
    let provider = Arc::new(ScriptedProvider::single_text(raw));
    let agent = agent(provider, &ha, memory().await);

    let reply = agent.process("kitchen light", None).await;

    assert_eq!(reply.text, raw);
    assert!(reply.commands.is_empty());
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn upstream_failure_records_nothing() {
    let (ha, calls) = fake_home_assistant().await;
    let memory = memory().await;
    let provider = Arc::new(ScriptedProvider::failing(ProviderError::Network(
        "connection refused".into(),
    )));
    let agent = agent(provider, &ha, memory.clone());

    let reply = agent.process("turn on the kitchen light", None).await;

    assert_eq!(reply.stage, PipelineStage::Failed);
    assert_eq!(reply.text, UPSTREAM_FAILURE_MESSAGE);
    assert!(calls.lock().unwrap().is_empty());
    assert!(memory.search_memories("", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_home_assistant_still_answers() {
    // Nothing listens on port 9 on loopback.
    let ha = HomeAssistantConfig::from_instance_url("http://127.0.0.1:9", "e2e-token");
    let provider = Arc::new(ScriptedProvider::single_text(
        "I can't see your devices right now. [ACTION:light.turn_on:{\"entity_id\": \"light.kitchen\"}]",
    ));
    let agent = agent(provider.clone(), &ha, memory().await);

    let reply = agent.process("kitchen light", None).await;

    assert_eq!(reply.stage, PipelineStage::Returned);
    assert_eq!(
        reply.text,
        "I can't see your devices right now. I've turned on light.kitchen."
    );
    assert_eq!(reply.commands.len(), 1);
    assert!(!reply.commands[0].success);
    assert!(
        provider.requests()[0].messages[1]
            .content
            .contains("No relevant entities found")
    );
}

#[tokio::test]
async fn answers_without_a_home_assistant_token() {
    let ha = HomeAssistantConfig::default();
    assert!(!ha.has_token());
    let provider = Arc::new(ScriptedProvider::single_text("It's 4pm."));
    let agent = agent(provider.clone(), &ha, memory().await);

    let reply = agent.process("what time is it", None).await;

    assert_eq!(reply.stage, PipelineStage::Returned);
    assert_eq!(reply.text, "It's 4pm.");
    assert!(
        provider.requests()[0].messages[1]
            .content
            .contains("No relevant entities found")
    );
}

#[tokio::test]
async fn stored_patterns_become_suggestions_and_reload_reaches_home_assistant() {
    let (ha, calls) = fake_home_assistant().await;
    let store = SqliteStore::new("sqlite::memory:").await.unwrap();

    for raw in states().as_array().unwrap() {
        let state = DeviceState::from_ha_json(raw).unwrap();
        store.save_entity(&state, false).await.unwrap();
    }
    let time_pattern = NewPattern {
        name: "kitchen evenings".into(),
        pattern_type: "time-based".into(),
        entities: vec!["light.kitchen".into()],
        data: serde_json::json!({"time": {"time": "18:45:00"}}),
        confidence: 0.9,
    };
    let weak_pattern = NewPattern {
        name: "garage mornings".into(),
        pattern_type: "time-based".into(),
        entities: vec!["switch.garage_door".into()],
        data: serde_json::json!({"time": {"time": "07:00:00"}}),
        confidence: 0.3,
    };
    store.save_pattern(&time_pattern).await.unwrap();
    store.save_pattern(&weak_pattern).await.unwrap();

    let patterns = store.patterns(None, MIN_SUGGESTION_CONFIDENCE).await.unwrap();
    let entities: std::collections::HashMap<_, _> = store
        .entities(None, false)
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.entity_id.clone(), e))
        .collect();
    let suggestions = suggest_automations(&patterns, &entities);
    assert_eq!(suggestions.len(), 1);

    let id = store.save_automation(&suggestions[0]).await.unwrap();
    let saved = store.automations(true).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, id);
    assert_eq!(saved[0].name, "Turn on Kitchen Light at 18:45:00");
    assert_eq!(saved[0].triggers[0]["at"], "18:45:00");

    let client = HomeAssistantClient::new(&ha).unwrap();
    reload_automations(&client).await.unwrap();
    assert_eq!(calls.lock().unwrap()[0].0, "automation.reload");
}
