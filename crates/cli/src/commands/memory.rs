//! `nexus memory` — Memory management commands.

use super::{CliResult, load_config, memory_manager, open_store, truncate};
use nexus_core::memory::MemoryStore;

pub async fn set(key: &str, value: &str, preference: bool) -> CliResult {
    let config = load_config()?;
    let manager = memory_manager(&config, open_store(&config).await?);

    manager.save(key, value, preference).await?;
    let kind = if preference { "preference" } else { "memory" };
    println!("✅ Saved {kind} '{key}'");
    Ok(())
}

pub async fn get(key: &str) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;

    match store.get_memory(key).await? {
        Some(item) => {
            println!("🧠 {}", item.key);
            println!("   {}", item.value);
            println!(
                "   created {} · updated {}{}",
                item.created_at.format("%Y-%m-%d %H:%M"),
                item.updated_at.format("%Y-%m-%d %H:%M"),
                if item.is_preference { " · preference" } else { "" }
            );
            Ok(())
        }
        None => Err(format!("No memory stored under '{key}'").into()),
    }
}

pub async fn list(preferences_only: bool) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let items = store.all_memories(preferences_only).await?;

    println!("🧠 Memories ({})", items.len());
    println!("==============");
    if items.is_empty() {
        println!("   (none)");
    }
    for item in &items {
        let marker = if item.is_preference { "★" } else { " " };
        println!("  {marker} {:<40} {}", truncate(&item.key, 40), truncate(&item.value, 60));
    }
    Ok(())
}

pub async fn search(query: &str, limit: usize) -> CliResult {
    let config = load_config()?;
    let manager = memory_manager(&config, open_store(&config).await?);

    println!("🔍 Searching memories for: \"{query}\"");
    println!();

    let results = manager.search(query, limit).await?;
    if results.is_empty() {
        println!("   No memories found.");
    }
    for (i, item) in results.iter().enumerate() {
        println!("  {:>2}. [score: {:.2}] {}", i + 1, item.score, item.key);
        println!("      {}", truncate(&item.value, 80));
    }
    Ok(())
}

pub async fn delete(key: &str) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;

    if store.delete_memory(key).await? {
        println!("🗑️  Deleted '{key}'");
        Ok(())
    } else {
        Err(format!("No memory stored under '{key}'").into())
    }
}

pub async fn prefs(name: Option<&str>, value: Option<&str>) -> CliResult {
    let config = load_config()?;
    let manager = memory_manager(&config, open_store(&config).await?);

    match (name, value) {
        (Some(name), Some(value)) => {
            manager.save_preference(name, value).await?;
            println!("✅ {name} = {value}");
        }
        (Some(name), None) => match manager.get_preference(name).await? {
            Some(value) => println!("{name} = {value}"),
            None => println!("   '{name}' is not set"),
        },
        (None, _) => {
            let all = manager.all_preferences().await?;
            println!("⭐ Preferences ({})", all.len());
            println!("================");
            for (name, value) in all {
                println!("  {name:<24} {value}");
            }
        }
    }
    Ok(())
}
