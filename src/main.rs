use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use note_search::commands::{explain, reindex_vault, search, set_api_key, show_status, watch_vault};
use note_search::config::{get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "note-search")]
#[command(about = "Semantic search over a directory of markdown notes")]
#[command(version)]
struct Cli {
    /// Configuration and index directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding service and indexing settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Store the API key for the embedding service
    SetKey {
        /// API key, kept in the configuration file
        key: String,
    },
    /// Embed every note in a vault that is not indexed yet
    Index {
        /// Directory of notes
        vault: PathBuf,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Find the notes most similar to a query
    Search {
        query: String,
        /// Maximum number of results
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Keep the index up to date as notes change
    Watch {
        /// Directory of notes
        vault: PathBuf,
    },
    /// Explain what a passage means in the context of its note
    Explain {
        /// Note containing the passage
        #[arg(long)]
        file: PathBuf,
        /// Exact text to explain
        #[arg(long)]
        selection: String,
    },
    /// Show the indexed documents
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::SetKey { key } => {
            set_api_key(&config_dir, &key)?;
        }
        Commands::Index { vault, yes } => {
            reindex_vault(&config_dir, &vault, yes).await?;
        }
        Commands::Search { query, limit } => {
            search(&config_dir, &query, limit).await?;
        }
        Commands::Watch { vault } => {
            watch_vault(&config_dir, &vault).await?;
        }
        Commands::Explain { file, selection } => {
            explain(&config_dir, &file, &selection).await?;
        }
        Commands::Status => {
            show_status(&config_dir).await?;
        }
    }

    Ok(())
}
