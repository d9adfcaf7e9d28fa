//! `nexus automations` — Automation management commands.

use super::{CliResult, ha_client, json_array, load_config, open_store};
use nexus_agent::suggest::{MIN_SUGGESTION_CONFIDENCE, reload_automations, suggest_automations};
use nexus_core::records::NewAutomation;
use std::collections::{HashMap, HashSet};

/// Arguments of `nexus automations add`, JSON still unparsed.
pub struct AddArgs {
    pub name: String,
    pub description: String,
    pub triggers: String,
    pub conditions: Option<String>,
    pub actions: String,
    pub suggested: Option<f64>,
}

impl AddArgs {
    fn into_new_automation(self) -> CliResult<NewAutomation> {
        let conditions = match self.conditions.as_deref() {
            Some(raw) => json_array(raw, "--conditions")?,
            None => serde_json::Value::Array(Vec::new()),
        };
        if let Some(c) = self.suggested {
            if !(0.0..=1.0).contains(&c) {
                return Err("--suggested confidence must be between 0.0 and 1.0".into());
            }
        }

        Ok(NewAutomation {
            triggers: json_array(&self.triggers, "--triggers")?,
            actions: json_array(&self.actions, "--actions")?,
            conditions,
            name: self.name,
            description: self.description,
            is_suggested: self.suggested.is_some(),
            confidence: self.suggested.unwrap_or(1.0),
        })
    }
}

pub async fn add(args: AddArgs) -> CliResult {
    let automation = args.into_new_automation()?;
    let config = load_config()?;
    let store = open_store(&config).await?;

    let id = store.save_automation(&automation).await?;
    println!("✅ Saved automation #{id}: {}", automation.name);

    match ha_client(&config) {
        Ok(client) => match reload_automations(&client).await {
            Ok(()) => println!("🔄 Reloaded automations in Home Assistant"),
            Err(e) => println!("⚠️  Saved locally, but Home Assistant reload failed: {e}"),
        },
        Err(_) => println!("   (no Home Assistant token, skipped reload)"),
    }
    Ok(())
}

pub async fn suggest() -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;

    let patterns = store.patterns(None, MIN_SUGGESTION_CONFIDENCE).await?;
    let entities: HashMap<_, _> = store
        .entities(None, false)
        .await?
        .into_iter()
        .map(|e| (e.entity_id.clone(), e))
        .collect();
    let existing: HashSet<String> = store.automations(false).await?.into_iter().map(|a| a.name).collect();

    println!("💡 Suggesting automations from {} pattern(s)", patterns.len());
    let mut saved = 0;
    for suggestion in suggest_automations(&patterns, &entities) {
        if existing.contains(&suggestion.name) {
            continue;
        }
        let id = store.save_automation(&suggestion).await?;
        println!(
            "  #{id:<4} {} [{:.0}%]",
            suggestion.name,
            suggestion.confidence * 100.0
        );
        saved += 1;
    }

    if saved == 0 {
        println!("   No new suggestions.");
    }
    Ok(())
}

pub async fn list(suggested_only: bool) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let automations = store.automations(suggested_only).await?;

    println!("⚙️  Automations ({})", automations.len());
    println!("=================");
    if automations.is_empty() {
        println!("   (none)");
    }
    for a in &automations {
        let status = if a.is_enabled { "on " } else { "off" };
        let suggested = if a.is_suggested {
            format!(" [suggested {:.0}%]", a.confidence * 100.0)
        } else {
            String::new()
        };
        println!("  #{:<4} {status} {}{suggested}", a.id, a.name);
        if !a.description.is_empty() {
            println!("        {}", a.description);
        }
        if let Some(at) = a.last_triggered {
            println!("        last triggered {}", at.format("%Y-%m-%d %H:%M"));
        }
    }
    Ok(())
}

pub async fn set_enabled(id: i64, enabled: bool) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;

    if !store.set_automation_enabled(id, enabled).await? {
        return Err(format!("No automation #{id}").into());
    }
    println!("✅ Automation #{id} {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

pub async fn triggered(id: i64) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;

    if !store.record_automation_trigger(id).await? {
        return Err(format!("No automation #{id}").into());
    }
    println!("✅ Recorded trigger for automation #{id}");
    Ok(())
}
