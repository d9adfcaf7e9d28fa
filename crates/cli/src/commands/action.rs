//! `nexus action` — Call a Home Assistant service directly.

use super::{CliResult, ha_client, json_object, load_config};
use nexus_core::device::DeviceApi;

pub async fn run(domain: &str, service: &str, data: Option<&str>) -> CliResult {
    let config = load_config()?;
    let data = match data {
        Some(raw) => json_object(raw, "--data")?,
        None => serde_json::Map::new(),
    };

    let client = ha_client(&config)?;
    let result = client.call_service(domain, service, &data).await?;

    println!("✅ Called {domain}.{service}");
    if !result.is_null() {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}
