//! `nexus entities` — Entity snapshot commands.

use super::{CliResult, ha_client, load_config, open_store, truncate};
use nexus_agent::context::is_always_relevant;
use nexus_core::device::DeviceApi;

pub async fn sync() -> CliResult {
    let config = load_config()?;
    let client = ha_client(&config)?;
    let store = open_store(&config).await?;

    println!("🔄 Syncing entities from {}", client.base_url());
    let states = client.get_states().await?;

    let mut important = 0;
    for state in &states {
        let flag = is_always_relevant(&state.id);
        if flag {
            important += 1;
        }
        store.save_entity(state, flag).await?;
    }

    println!("✅ Stored {} entities ({important} always relevant)", states.len());
    Ok(())
}

pub async fn list(domain: Option<&str>, important_only: bool) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let entities = store.entities(domain, important_only).await?;

    println!("🏠 Entities ({})", entities.len());
    println!("=============");
    if entities.is_empty() {
        println!("   (none stored — run `nexus entities sync`)");
    }
    for e in &entities {
        let marker = if e.is_important { "★" } else { " " };
        println!(
            "  {marker} {:<40} {:<24} {}",
            truncate(&e.entity_id, 40),
            truncate(&e.state, 24),
            e.friendly_name
        );
    }
    Ok(())
}

pub async fn history(entity_id: &str, limit: usize) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;

    let Some(current) = store.entity(entity_id).await? else {
        return Err(format!("Unknown entity '{entity_id}'").into());
    };

    println!("📈 {} ({})", current.friendly_name, current.entity_id);
    println!("   now: {} (updated {})", current.state, current.last_updated.format("%Y-%m-%d %H:%M:%S"));
    println!();

    for entry in store.entity_history(entity_id, limit).await? {
        println!("  {}  {}", entry.recorded_at.format("%Y-%m-%d %H:%M:%S"), entry.state);
    }
    Ok(())
}
