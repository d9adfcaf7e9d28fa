//! `nexus ask` — Single-prompt or interactive mode.

use super::{CliResult, device_client, json_object, load_config, memory_manager, open_store};
use nexus_agent::{AgentReply, AgentSettings, NexusAgent};
use nexus_providers::OpenAiCompatProvider;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(prompt: Option<String>, context: Option<String>) -> CliResult {
    let config = load_config()?;
    let extra = context.as_deref().map(|raw| json_object(raw, "--context")).transpose()?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    export OPENAI_API_KEY='sk-...'");
        eprintln!("    export NEXUS_API_KEY='sk-...'   (any OpenAI-compatible endpoint)");
        eprintln!();
        eprintln!("  Or add llm.api_key to:");
        eprintln!("    {}", nexus_config::AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = OpenAiCompatProvider::from_config(&config.llm)?;
    let devices = device_client(&config)?;
    let store = open_store(&config).await?;
    let memory = memory_manager(&config, store);

    let agent = NexusAgent::new(
        Arc::new(provider),
        Arc::new(devices),
        Arc::new(memory),
        AgentSettings::from_config(&config),
    );

    if let Some(prompt) = prompt {
        eprint!("  Thinking...");
        let reply = agent.process(&prompt, extra).await;
        eprint!("\r              \r");
        print_reply(&reply, false);
        if reply.is_failure() {
            return Err("The AI service could not be reached".into());
        }
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        Nexus AI — Interactive Mode           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:          {}", config.llm.model);
    println!("  Home Assistant: {}", config.home_assistant.api_url);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        eprint!("  ...");
        let reply = agent.process(line, extra.clone()).await;
        eprint!("\r     \r");
        println!();
        print_reply(&reply, true);
        println!();
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

fn print_reply(reply: &AgentReply, prefixed: bool) {
    for line in reply.text.lines() {
        if prefixed {
            println!("  Nexus > {line}");
        } else {
            println!("{line}");
        }
    }

    for result in &reply.commands {
        let name = result.command.qualified_name();
        match &result.error {
            None => eprintln!("  ✅ {name}"),
            Some(e) => eprintln!("  ❌ {name}: {e}"),
        }
    }
}
