//! hublock CLI

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "hublock")]
#[command(author, version, about = "hublock - manifest resolution and unlock script engine")]
pub struct Cli {
    /// Show what would happen without making changes
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve identifiers and synthesize unlock scripts
    Resolve {
        /// App id(s) or search terms
        #[arg(required = true)]
        queries: Vec<String>,
        /// Pin manifest revisions in the synthesized scripts
        #[arg(long, overrides_with = "no_pin")]
        pin: bool,
        /// Do not pin manifest revisions
        #[arg(long = "no-pin", overrides_with = "pin")]
        no_pin: bool,
    },
    /// Decode legacy encrypted containers into scripts
    Decode {
        /// Container files, or directories to scan for them
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Reconcile a directory of scripts against fresh manifests
    Fix {
        /// Directory containing the scripts (and any containers)
        folder: PathBuf,
    },
    /// Look up an app by id or name
    Search {
        /// App id or search term
        query: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let dry_run = cli.dry_run;

    match cli.command {
        Commands::Resolve {
            queries,
            pin,
            no_pin,
        } => {
            // Neither flag given: fall back to the configured default
            let pin = match (pin, no_pin) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            cmd::resolve::resolve(&queries, pin, dry_run).await
        }
        Commands::Decode { paths } => cmd::decode::decode(&paths, dry_run).await,
        Commands::Fix { folder } => cmd::fix::fix(&folder, dry_run).await,
        Commands::Search { query } => cmd::search::search(&query).await,
    }
}
