//! `nexus ha` — Home Assistant connection commands.

use super::{CliResult, ha_client, load_config, memory_manager, open_store};
use nexus_agent::context::is_always_relevant;
use nexus_core::records::ConnectionStatus;
use nexus_homeassistant::{EventStream, HaEvent};

pub async fn check() -> CliResult {
    let config = load_config()?;
    let client = ha_client(&config)?;
    let store = open_store(&config).await?;

    println!("🔌 Checking {}", client.base_url());

    let info = match client.check_connection().await {
        Ok(info) => info,
        Err(e) => {
            store
                .update_ha_connection_status(ConnectionStatus::Error, None, None)
                .await?;
            return Err(format!("Home Assistant unreachable: {e}").into());
        }
    };

    let token_ok = client.token_valid().await?;
    let status = if token_ok {
        ConnectionStatus::Connected
    } else {
        ConnectionStatus::Error
    };
    let updated = store
        .update_ha_connection_status(status, info.version.as_deref(), info.location_name.as_deref())
        .await?;

    println!("  Version:  {}", info.version.as_deref().unwrap_or("unknown"));
    println!("  Location: {}", info.location_name.as_deref().unwrap_or("unknown"));
    if let Some(tz) = &info.time_zone {
        println!("  Timezone: {tz}");
    }
    println!("  Token:    {}", if token_ok { "✅ valid" } else { "❌ rejected" });
    if !updated {
        println!("  (no saved connection to update — see `nexus onboard --ha-url ... --ha-token ...`)");
    }

    if let Some(saved) = store.active_ha_connection().await? {
        let token = config.home_assistant.token.as_deref().unwrap_or_default();
        if !store.verify_ha_token(token).await? {
            println!(
                "  ⚠️  Configured token differs from the one saved for {}",
                saved.instance_url
            );
        }
    }
    Ok(())
}

pub async fn watch(count: Option<usize>) -> CliResult {
    let config = load_config()?;
    if !config.home_assistant.has_token() {
        return Err("No Home Assistant token. Set HA_TOKEN or home_assistant.token".into());
    }
    let store = open_store(&config).await?;
    let manager = memory_manager(&config, store.clone());

    let mut stream = EventStream::connect(&config.home_assistant).await?;
    stream.subscribe(Some("state_changed")).await?;
    println!(
        "👀 Watching state changes on Home Assistant {} (Ctrl+C to stop)",
        stream.ha_version().unwrap_or("")
    );

    let mut seen = 0usize;
    while count.is_none_or(|max| seen < max) {
        let event = tokio::select! {
            event = stream.next_event() => event?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(event) = event else {
            println!("  Connection closed by server");
            break;
        };

        let HaEvent::StateChanged {
            entity_id,
            old_state,
            new_state: Some(new_state),
        } = event
        else {
            continue;
        };

        let old = old_state.map(|s| s.state).unwrap_or_else(|| "∅".into());
        println!("  {entity_id}: {old} → {}", new_state.state);

        store.save_entity(&new_state, is_always_relevant(&new_state.id)).await?;
        if let Err(e) = manager.track_entity(&new_state).await {
            tracing::warn!(entity_id = %new_state.id, "Failed to track entity: {e}");
        }
        seen += 1;
    }

    stream.close().await?;
    println!("✅ Stored {seen} state change(s)");
    Ok(())
}
