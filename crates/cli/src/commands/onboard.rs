//! `nexus onboard` — First-time setup.

use super::{CliResult, load_config, open_store};
use nexus_config::{AppConfig, HomeAssistantConfig};
use nexus_core::records::ConnectionStatus;
use nexus_homeassistant::HomeAssistantClient;

pub async fn run(ha_url: Option<String>, ha_token: Option<String>) -> CliResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🏠 Nexus AI — First-Time Setup");
    println!("==============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
    }

    let config = load_config()?;
    let store = open_store(&config).await?;
    if store.get_setting("onboarded_at").await?.is_none() {
        store
            .set_setting("onboarded_at", &chrono::Utc::now().to_rfc3339())
            .await?;
    }
    println!("✅ Database ready at: {}", config.storage.path.display());

    if let (Some(url), Some(token)) = (ha_url, ha_token) {
        let id = store.save_ha_connection(&url, &token).await?;
        println!("✅ Saved Home Assistant connection #{id} ({url})");

        let client = HomeAssistantClient::new(&HomeAssistantConfig::from_instance_url(&url, token))?;
        match client.check_connection().await {
            Ok(info) => {
                store
                    .update_ha_connection_status(
                        ConnectionStatus::Connected,
                        info.version.as_deref(),
                        info.location_name.as_deref(),
                    )
                    .await?;
                println!(
                    "✅ Connected to Home Assistant {}",
                    info.version.as_deref().unwrap_or("(unknown version)")
                );
            }
            Err(e) => {
                store
                    .update_ha_connection_status(ConnectionStatus::Error, None, None)
                    .await?;
                println!("⚠️  Could not reach Home Assistant: {e}");
            }
        }
        println!("   Add the URL (with /api) and token to config.toml or export HA_URL / HA_TOKEN.");
    }

    println!("\n📝 Next steps:");
    if !config.has_api_key() {
        println!("   • Set OPENAI_API_KEY or add llm.api_key to {}", config_path.display());
    }
    if !config.home_assistant.has_token() {
        println!("   • Set HA_TOKEN or add home_assistant.token to config.toml");
    }
    println!("   • Run: nexus doctor");
    println!("   • Then: nexus ask \"what's on in the living room?\"\n");

    Ok(())
}
