//! `nexus export` — Dump every stored record as JSON.

use super::{CliResult, load_config, open_store};
use std::collections::BTreeMap;

pub async fn run(output: Option<&str>) -> CliResult {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let records = store.export_records().await?;
    let json = serde_json::to_string_pretty(&records)?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)?;
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for record in &records {
                *counts.entry(record.kind()).or_default() += 1;
            }
            println!("📦 Exported {} records to {path}", records.len());
            for (kind, n) in counts {
                println!("   {kind:<12} {n}");
            }
        }
        None => println!("{json}"),
    }
    Ok(())
}
