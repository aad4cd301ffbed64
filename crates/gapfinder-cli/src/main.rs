//! gapfinder: semantic content-gap detection between a site and its competitors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use gapfinder_core::EngineConfig;
use gapfinder_embed::{EmbeddingService, ServiceError};
use gapfinder_runtime::{load_pages, EngineContext, Orchestrator};
use gapfinder_store::SqliteStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, PartialEq)]
enum Command {
    Run {
        pages: PathBuf,
        config: Option<PathBuf>,
    },
    Analyze {
        config: Option<PathBuf>,
    },
    Stats {
        config: Option<PathBuf>,
    },
    Help,
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some(cmd) = args.get(1) else {
        return Ok(Command::Help);
    };
    let optional = |i: usize| args.get(i).map(PathBuf::from);
    match cmd.as_str() {
        "run" => match args.get(2) {
            Some(pages) => Ok(Command::Run {
                pages: PathBuf::from(pages),
                config: optional(3),
            }),
            None => Err("Usage: gapfinder run <pages.json> [config.json]".into()),
        },
        "analyze" => Ok(Command::Analyze { config: optional(2) }),
        "stats" => Ok(Command::Stats { config: optional(2) }),
        "--help" | "-h" | "help" => Ok(Command::Help),
        other => Err(format!(
            "Unknown command: {}. Use 'gapfinder help' for usage.",
            other
        )),
    }
}

fn print_help() {
    println!("gapfinder — semantic content-gap detection");
    println!();
    println!("Usage: gapfinder <command>");
    println!();
    println!("Commands:");
    println!("  run <pages.json> [config.json]   Ingest, embed, analyze and print the report");
    println!("  analyze [config.json]            Re-run analysis over stored vectors");
    println!("  stats [config.json]              Print store statistics");
    println!("  help                             Show this help message");
}

/// Stands in for the HTTP service on analysis-only runs, which never embed.
struct OfflineService;

#[async_trait]
impl EmbeddingService for OfflineService {
    async fn embed(&self, _model_id: &str, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Err(ServiceError::Permanent(
            "embedding is unavailable on analysis-only runs".into(),
        ))
    }

    fn name(&self) -> &str {
        "offline"
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = EngineConfig::load(path)?;
    info!("Database: {}", config.database_path.display());
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = match parse_command(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
    };

    match command {
        Command::Help => print_help(),
        Command::Run { pages, config } => {
            let config = load_config(config.as_deref())?;
            let pages = load_pages(&pages)?;
            let service = gapfinder_embed::create_service(&config.embedding)?;
            let engine = Orchestrator::new(EngineContext::open(config, service)?);
            let report = engine.run(&pages).await?;
            print_json(&report)?;
        }
        Command::Analyze { config } => {
            let config = load_config(config.as_deref())?;
            let engine = Orchestrator::new(EngineContext::open(config, Arc::new(OfflineService))?);
            let report = engine.analyze_only().await?;
            print_json(&report)?;
        }
        Command::Stats { config } => {
            let config = load_config(config.as_deref())?;
            let store = SqliteStore::open(&config.database_path)?;
            print_json(&store.get_stats()?)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("gapfinder")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_run_with_config() {
        let cmd = parse_command(&args(&["run", "pages.json", "cfg.json"])).unwrap();
        assert_eq!(
            cmd,
            Command::Run {
                pages: PathBuf::from("pages.json"),
                config: Some(PathBuf::from("cfg.json")),
            }
        );
    }

    #[test]
    fn test_parse_run_requires_pages() {
        assert!(parse_command(&args(&["run"])).is_err());
    }

    #[test]
    fn test_parse_defaults_to_help() {
        assert_eq!(parse_command(&args(&[])).unwrap(), Command::Help);
        assert_eq!(
            parse_command(&args(&["stats"])).unwrap(),
            Command::Stats { config: None }
        );
        assert!(parse_command(&args(&["serve"])).is_err());
    }
}
