mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use memdex::config::MemdexConfig;

#[derive(Parser)]
#[command(name = "memdex", version, about = "Local semantic memory index for markdown notes")]
struct Cli {
    /// Config file (default: ~/.memdex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root, overriding the config file
    #[arg(short, long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index new and changed memory files, drop removed ones
    Sync,
    /// Discard the index and re-embed every memory file
    Reindex,
    /// Search the index
    Search {
        query: String,
        /// Number of results (default: search.max_results)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Use full-text keyword search instead of vector search
        #[arg(long)]
        keyword: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show file and chunk counts
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Sync, then keep the index current as files change
    Watch,
    /// Check database health, capabilities, and configuration drift
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MemdexConfig::load_from(path)?,
        None => MemdexConfig::load()?,
    };
    if let Some(ws) = cli.workspace {
        config.workspace.root = ws;
    }

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Sync => cli::sync::sync(&config).await?,
        Command::Reindex => cli::sync::reindex(&config).await?,
        Command::Search {
            query,
            top_k,
            keyword,
            json,
        } => cli::search::search(&config, &query, top_k, keyword, json).await?,
        Command::Stats { json } => cli::stats::stats(&config, json)?,
        Command::Watch => cli::watch::watch(&config).await?,
        Command::Doctor => cli::doctor::doctor(&config).await?,
    }

    Ok(())
}
