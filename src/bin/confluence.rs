//! Confluence CLI: run requests through the engine with echo responders.
//!
//! Usage:
//!   confluence ask <query> [--kind chat] [--attr key=value]... [--json]
//!   confluence fuse <subtype> [--param key=value]...
//!   confluence state
//!
//! Global options: `--config <path>` (default `<config dir>/confluence/config.yaml`
//! when present) and `--log-level <filter>` (`RUST_LOG` wins when set).

use clap::{Parser, Subcommand};
use confluence::responder::mock::MockResponder;
use confluence::{
    ConfluenceConfig, FusionSubtype, Orchestrator, Request, ResponderId, ResponderSet,
    ResponseEvent,
};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "confluence",
    version,
    about = "Multi-responder orchestration with chained context"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter (error, warn, info, debug, trace or a full directive)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one request and print its results
    Ask {
        /// The request text
        query: String,
        /// Request kind; kinds containing "analysis" classify as complex
        #[arg(long, default_value = "chat")]
        kind: String,
        /// Request attribute as key=value (repeatable)
        #[arg(long = "attr", value_parser = parse_key_value)]
        attrs: Vec<(String, String)>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Activate a fusion directly
    Fuse {
        /// interface_forge, chrono_sculptor, hyper_creation_engine or adaptive_genesis
        subtype: FusionSubtype,
        /// Fusion parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
    /// Print the engine state as JSON
    State,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

/// Install the global subscriber, writing to stderr so stdout stays clean
fn init_logging(level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("invalid log level '{level}': {e}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| format!("failed to set subscriber: {e}"))
}

/// Default config path (~/.config/confluence/config.yaml on Linux)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("confluence").join("config.yaml"))
}

fn load_config(explicit: Option<PathBuf>) -> Result<ConfluenceConfig, String> {
    if let Some(path) = explicit {
        return ConfluenceConfig::load(&path)
            .map_err(|e| format!("Failed to load config '{}': {}", path.display(), e));
    }
    match default_config_path() {
        Some(path) if path.exists() => ConfluenceConfig::load(&path)
            .map_err(|e| format!("Failed to load config '{}': {}", path.display(), e)),
        _ => Ok(ConfluenceConfig::default()),
    }
}

fn echo_orchestrator(config: ConfluenceConfig) -> Orchestrator {
    let responders = ResponderSet::new(
        Arc::new(MockResponder::echo(ResponderId::Protective)),
        Arc::new(MockResponder::echo(ResponderId::Creative)),
        Arc::new(MockResponder::echo(ResponderId::Unifying)),
    );
    Orchestrator::new(responders, config)
}

async fn cmd_ask(
    orchestrator: &Orchestrator,
    query: String,
    kind: String,
    attrs: Vec<(String, String)>,
    json: bool,
) -> i32 {
    let request = Request::new(query, kind).with_attributes(attrs);
    let mut stream = orchestrator.process_request(request);
    let mut code = 0;

    while let Some(event) = stream.next().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            }
            continue;
        }
        match event {
            ResponseEvent::Tagged(result) => {
                let status = if result.errored { " (failed)" } else { "" };
                println!(
                    "[{}{}] {:.2}  {}",
                    result.responder.label(),
                    status,
                    result.confidence,
                    result.content
                );
            }
            ResponseEvent::Synthesized(result) => {
                if result.confidence == 0.0 {
                    code = 1;
                }
                println!();
                println!("{}", result.content);
            }
        }
    }
    code
}

async fn cmd_fuse(
    orchestrator: &Orchestrator,
    subtype: FusionSubtype,
    params: Vec<(String, String)>,
) -> i32 {
    let params: BTreeMap<String, String> = params.into_iter().collect();
    match orchestrator.activate_fusion(subtype, params).await {
        Ok(result) => {
            println!("{}", result.content);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_state(orchestrator: &Orchestrator) -> i32 {
    match serde_json::to_string_pretty(&orchestrator.system_state_map()) {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let orchestrator = echo_orchestrator(config);

    let code = match cli.command {
        Commands::Ask {
            query,
            kind,
            attrs,
            json,
        } => cmd_ask(&orchestrator, query, kind, attrs, json).await,
        Commands::Fuse { subtype, params } => cmd_fuse(&orchestrator, subtype, params).await,
        Commands::State => cmd_state(&orchestrator),
    };
    std::process::exit(code);
}
