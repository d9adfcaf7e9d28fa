//! `nexus weather` — Current conditions from Home Assistant.

use super::{CliResult, ha_client, load_config};
use nexus_core::device::DeviceApi;
use nexus_homeassistant::current_weather;

pub async fn run(days: usize) -> CliResult {
    let config = load_config()?;
    let client = ha_client(&config)?;
    let states = client.get_states().await?;

    let Some(report) = current_weather(&states) else {
        return Err("No weather entity found in Home Assistant".into());
    };

    println!("🌤️  {}", report.summary());
    if let Some(p) = report.pressure {
        println!("   pressure {p}");
    }
    if let Some(p) = report.precipitation {
        println!("   precipitation {p}");
    }

    let forecast = report.forecast_days(days);
    if !forecast.is_empty() {
        println!();
        for f in forecast {
            let when = f.datetime.as_deref().unwrap_or("?");
            let when = when.get(..10).unwrap_or(when);
            let high = f.temperature.map(|t| format!("{t}°")).unwrap_or_default();
            let low = f.templow.map(|t| format!(" / {t}°")).unwrap_or_default();
            println!(
                "   {when}  {:<14} {high}{low}",
                f.condition.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}
