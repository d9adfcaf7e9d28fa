//! `nexus doctor` — Diagnose configuration and connectivity.

use nexus_config::AppConfig;
use nexus_core::provider::Provider;
use nexus_homeassistant::HomeAssistantClient;
use nexus_memory::SqliteStore;
use nexus_providers::OpenAiCompatProvider;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Nexus Doctor — System Diagnostics");
    println!("====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found");
    } else {
        println!("  ⚠️  No config file — run `nexus onboard` (using defaults and environment)");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before running further checks.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ✅ LLM API key configured ({} via {})", config.llm.model, config.llm.api_url);
        match OpenAiCompatProvider::from_config(&config.llm) {
            Ok(provider) => match provider.health_check().await {
                Ok(true) => println!("  ✅ LLM endpoint reachable"),
                Ok(false) => {
                    println!("  ❌ LLM endpoint rejected the key");
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ LLM endpoint unreachable: {e}");
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ LLM client: {e}");
                issues += 1;
            }
        }
    } else {
        println!("  ⚠️  No LLM API key — set OPENAI_API_KEY or llm.api_key");
        issues += 1;
    }

    match SqliteStore::open(&config.storage.path).await {
        Ok(store) => {
            let count = store.memory_count().await.unwrap_or(0);
            println!("  ✅ Database OK ({count} memories) at {}", config.storage.path.display());
        }
        Err(e) => {
            println!("  ❌ Database unavailable: {e}");
            issues += 1;
        }
    }

    if !config.home_assistant.has_token() {
        println!("  ⚠️  No Home Assistant token — set HA_TOKEN or home_assistant.token");
        issues += 1;
    } else {
        match HomeAssistantClient::new(&config.home_assistant) {
            Ok(client) => match client.check_connection().await {
                Ok(info) => println!(
                    "  ✅ Home Assistant reachable ({})",
                    info.version.as_deref().unwrap_or("unknown version")
                ),
                Err(e) => {
                    println!("  ❌ Home Assistant unreachable at {}: {e}", client.base_url());
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ Home Assistant client: {e}");
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
