//! Nexus CLI — the main entry point.
//!
//! Commands:
//! - `onboard`     — Create config and database, optionally save a Home Assistant connection
//! - `ask`         — Ask the assistant (single prompt or interactive)
//! - `action`      — Call a Home Assistant service directly
//! - `memory`      — Manage stored memories and preferences
//! - `entities`    — Sync and inspect entity snapshots
//! - `automations` — Manage saved and suggested automations
//! - `patterns`    — Record and list usage patterns
//! - `ha`          — Check the connection or watch live events
//! - `weather`     — Show current weather from Home Assistant
//! - `export`      — Dump every stored record as JSON
//! - `doctor`      — Diagnose configuration and connectivity

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "nexus",
    about = "Nexus AI — an LLM companion for Home Assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create configuration and database
    Onboard {
        /// Home Assistant base URL, e.g. http://homeassistant.local:8123
        #[arg(long, requires = "ha_token")]
        ha_url: Option<String>,

        /// Long-lived access token for that instance
        #[arg(long, requires = "ha_url")]
        ha_token: Option<String>,
    },

    /// Ask the assistant; without a prompt, start an interactive session
    Ask {
        prompt: Option<String>,

        /// Extra context as a JSON object, e.g. '{"room":"kitchen"}'
        #[arg(short, long)]
        context: Option<String>,
    },

    /// Call a Home Assistant service directly
    Action {
        domain: String,
        service: String,

        /// Service data as a JSON object
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Manage memories and preferences
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Sync and inspect entity snapshots
    Entities {
        #[command(subcommand)]
        action: EntitiesAction,
    },

    /// Manage automations
    Automations {
        #[command(subcommand)]
        action: AutomationsAction,
    },

    /// Record and list usage patterns
    Patterns {
        #[command(subcommand)]
        action: PatternsAction,
    },

    /// Home Assistant connection tools
    Ha {
        #[command(subcommand)]
        action: HaAction,
    },

    /// Show current weather
    Weather {
        /// Forecast periods to show
        #[arg(short, long, default_value = "3")]
        days: usize,
    },

    /// Export every stored record as JSON
    Export {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Diagnose configuration and connectivity
    Doctor,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Store a memory under a key
    Set {
        key: String,
        value: String,
        /// Mark as a preference
        #[arg(short, long)]
        preference: bool,
    },
    /// Show one memory
    Get { key: String },
    /// List memories, newest first
    List {
        /// Only preferences
        #[arg(short, long)]
        preferences: bool,
    },
    /// Search memories
    Search {
        query: String,
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },
    /// Delete a memory
    Delete { key: String },
    /// Show or set named preferences
    Prefs {
        /// Preference name (lists all when omitted)
        name: Option<String>,
        /// New value
        value: Option<String>,
    },
}

#[derive(Subcommand)]
enum EntitiesAction {
    /// Fetch all states from Home Assistant and store snapshots
    Sync,
    /// List stored snapshots
    List {
        #[arg(short, long)]
        domain: Option<String>,
        /// Only always-relevant entities
        #[arg(short, long)]
        important: bool,
    },
    /// Show recorded states of one entity
    History {
        entity_id: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum AutomationsAction {
    /// Save an automation
    Add {
        name: String,
        /// Triggers as a JSON array
        #[arg(long)]
        triggers: String,
        /// Actions as a JSON array
        #[arg(long)]
        actions: String,
        /// Conditions as a JSON array
        #[arg(long)]
        conditions: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Mark as a suggestion with this confidence
        #[arg(long)]
        suggested: Option<f64>,
    },
    /// Suggest automations from recorded patterns
    Suggest,
    /// List automations
    List {
        /// Only suggestions
        #[arg(short, long)]
        suggested: bool,
    },
    /// Enable an automation
    Enable { id: i64 },
    /// Disable an automation
    Disable { id: i64 },
    /// Record that an automation fired
    Triggered { id: i64 },
}

#[derive(Subcommand)]
enum PatternsAction {
    /// Record a pattern detection
    Record {
        name: String,
        #[arg(short = 't', long = "type")]
        pattern_type: String,
        /// Confidence of this detection, 0.0–1.0
        #[arg(short, long)]
        confidence: f64,
        /// Entities involved (repeatable)
        #[arg(short, long)]
        entity: Vec<String>,
        /// Pattern data as a JSON object
        #[arg(short, long)]
        data: Option<String>,
    },
    /// List patterns by confidence
    List {
        #[arg(short = 't', long = "type")]
        pattern_type: Option<String>,
        #[arg(short, long, default_value = "0.0")]
        min_confidence: f64,
    },
}

#[derive(Subcommand)]
enum HaAction {
    /// Check the connection and token
    Check,
    /// Stream state changes, storing each as a snapshot
    Watch {
        /// Stop after this many events
        #[arg(short, long)]
        count: Option<usize>,
    },
}

/// `RUST_LOG` wins, then `--verbose`, then `LOG_LEVEL`, then `info`.
fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "debug".to_string()
    } else {
        std::env::var("LOG_LEVEL")
            .map(|l| l.to_lowercase())
            .unwrap_or_else(|_| "info".to_string())
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Onboard { ha_url, ha_token } => commands::onboard::run(ha_url, ha_token).await?,
        Commands::Ask { prompt, context } => commands::ask::run(prompt, context).await?,
        Commands::Action {
            domain,
            service,
            data,
        } => commands::action::run(&domain, &service, data.as_deref()).await?,
        Commands::Memory { action } => match action {
            MemoryAction::Set {
                key,
                value,
                preference,
            } => commands::memory::set(&key, &value, preference).await?,
            MemoryAction::Get { key } => commands::memory::get(&key).await?,
            MemoryAction::List { preferences } => commands::memory::list(preferences).await?,
            MemoryAction::Search { query, limit } => commands::memory::search(&query, limit).await?,
            MemoryAction::Delete { key } => commands::memory::delete(&key).await?,
            MemoryAction::Prefs { name, value } => {
                commands::memory::prefs(name.as_deref(), value.as_deref()).await?
            }
        },
        Commands::Entities { action } => match action {
            EntitiesAction::Sync => commands::entities::sync().await?,
            EntitiesAction::List { domain, important } => {
                commands::entities::list(domain.as_deref(), important).await?
            }
            EntitiesAction::History { entity_id, limit } => {
                commands::entities::history(&entity_id, limit).await?
            }
        },
        Commands::Automations { action } => match action {
            AutomationsAction::Add {
                name,
                triggers,
                actions,
                conditions,
                description,
                suggested,
            } => {
                commands::automations::add(commands::automations::AddArgs {
                    name,
                    description,
                    triggers,
                    conditions,
                    actions,
                    suggested,
                })
                .await?
            }
            AutomationsAction::Suggest => commands::automations::suggest().await?,
            AutomationsAction::List { suggested } => commands::automations::list(suggested).await?,
            AutomationsAction::Enable { id } => commands::automations::set_enabled(id, true).await?,
            AutomationsAction::Disable { id } => {
                commands::automations::set_enabled(id, false).await?
            }
            AutomationsAction::Triggered { id } => commands::automations::triggered(id).await?,
        },
        Commands::Patterns { action } => match action {
            PatternsAction::Record {
                name,
                pattern_type,
                confidence,
                entity,
                data,
            } => {
                commands::patterns::record(&name, &pattern_type, confidence, entity, data.as_deref())
                    .await?
            }
            PatternsAction::List {
                pattern_type,
                min_confidence,
            } => commands::patterns::list(pattern_type.as_deref(), min_confidence).await?,
        },
        Commands::Ha { action } => match action {
            HaAction::Check => commands::ha::check().await?,
            HaAction::Watch { count } => commands::ha::watch(count).await?,
        },
        Commands::Weather { days } => commands::weather::run(days).await?,
        Commands::Export { output } => commands::export::run(output.as_deref()).await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
