//! Flowerbase rules tool
//!
//! Validates an app's rules and evaluates single documents against them.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bson::{Bson, Document};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flowerbase::AppState;
use flowerbase_common::config::FlowerbaseConfig;
use flowerbase_common::types::ValidationType;

#[derive(Parser, Debug)]
#[command(name = "flowerbase")]
#[command(about = "Flowerbase rule engine", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "flowerbase.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "FLOWERBASE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load rules and functions and report invalid rules
    Check,
    /// Validate one document and print the decision
    Eval {
        /// Collection whose rules apply
        #[arg(long)]
        collection: String,

        /// insert, read, delete, search or write
        #[arg(long = "type", default_value = "read")]
        validation_type: String,

        /// User as a JSON object
        #[arg(long, default_value = "{}")]
        user: String,

        /// Document as a JSON object
        #[arg(long)]
        document: String,
    },
}

fn load_config(path: &Path) -> anyhow::Result<FlowerbaseConfig> {
    if path.exists() {
        FlowerbaseConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))
    } else {
        Ok(FlowerbaseConfig::default())
    }
}

fn init_logging(config: &FlowerbaseConfig, level: Option<&str>) {
    let level = level.unwrap_or(&config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

fn parse_document(label: &str, json: &str) -> anyhow::Result<Document> {
    serde_json::from_str(json).with_context(|| format!("--{label} must be a JSON object"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    init_logging(&config, args.log_level.as_deref());

    info!("Flowerbase v{}", env!("CARGO_PKG_VERSION"));
    let app = AppState::new(config)?;

    match args.command {
        Command::Check => {
            let issues = app.issues();
            println!(
                "{} collections, {} functions, {} issues",
                app.rules().len(),
                app.functions().registry().len(),
                issues.len()
            );
            let mut collections: Vec<_> = app.rules().iter().collect();
            collections.sort_by(|a, b| a.0.cmp(b.0));
            for (name, rules) in collections {
                println!(
                    "  {name}: {} roles, {} filters",
                    rules.roles.len(),
                    rules.filters.len()
                );
            }
            for issue in &issues {
                println!("{}: {}: {}", issue.collection, issue.location, issue.error);
            }
            if !issues.is_empty() {
                anyhow::bail!("{} invalid rules", issues.len());
            }
        }
        Command::Eval {
            collection,
            validation_type,
            user,
            document,
        } => {
            let validation_type: ValidationType = validation_type.parse()?;
            let user = parse_document("user", &user)?;
            let document = parse_document("document", &document)?;

            let result = app
                .evaluate(&collection, validation_type, user, &document)
                .await?;
            let output = serde_json::json!({
                "status": result.is_some(),
                "document": result.map(|d| Bson::Document(d).into_relaxed_extjson()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
