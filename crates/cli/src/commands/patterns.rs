//! `nexus patterns` — Usage pattern commands.

use super::{CliResult, json_object, load_config, open_store};
use nexus_core::records::NewPattern;

pub async fn record(
    name: &str,
    pattern_type: &str,
    confidence: f64,
    entities: Vec<String>,
    data: Option<&str>,
) -> CliResult {
    if !(0.0..=1.0).contains(&confidence) {
        return Err("--confidence must be between 0.0 and 1.0".into());
    }
    let data = match data {
        Some(raw) => serde_json::Value::Object(json_object(raw, "--data")?),
        None => serde_json::json!({}),
    };

    let config = load_config()?;
    let store = open_store(&config).await?;

    let pattern = NewPattern {
        name: name.to_string(),
        pattern_type: pattern_type.to_string(),
        entities,
        data,
        confidence,
    };
    let id = store.save_pattern(&pattern).await?;
    println!("✅ Recorded pattern #{id}: {name}");
    Ok(())
}

pub async fn list(pattern_type: Option<&str>, min_confidence: f64) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let patterns = store.patterns(pattern_type, min_confidence).await?;

    println!("📊 Patterns ({})", patterns.len());
    println!("=============");
    if patterns.is_empty() {
        println!("   (none)");
    }
    for p in &patterns {
        println!(
            "  #{:<4} {:>5.1}%  {} [{}] seen {}×, last {}",
            p.id,
            p.confidence * 100.0,
            p.name,
            p.pattern_type,
            p.times_detected,
            p.last_detected.format("%Y-%m-%d %H:%M")
        );
        if !p.entities.is_empty() {
            println!("        {}", p.entities.join(", "));
        }
    }
    Ok(())
}
