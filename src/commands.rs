use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use console::style;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::cache::{IndexCache, JsonFileStore, SnapshotStore};
use crate::config::Config;
use crate::embeddings::{EmbeddingProvider, OpenAiClient};
use crate::indexer::{ReindexEstimate, ReindexObserver, ReindexOutcome, ReindexProgress};
use crate::search::QueryService;
use crate::service::EmbeddingSearch;
use crate::vault::{DocumentSource, FsVault};

fn load_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).context("Failed to load configuration")
}

fn build_client(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let client = OpenAiClient::new(&config.openai).context("Failed to create OpenAI client")?;
    if !client.has_api_key() {
        warn!("No API key configured; run 'note-search set-key' or set OPENAI_API_KEY");
    }
    Ok(Arc::new(client))
}

fn snapshot_store(config: &Config) -> Arc<dyn SnapshotStore> {
    Arc::new(JsonFileStore::new(config.snapshot_path()))
}

async fn open_service(config: &Config, vault: FsVault) -> Result<Arc<EmbeddingSearch>> {
    let service = EmbeddingSearch::open(
        build_client(config)?,
        Arc::new(vault) as Arc<dyn DocumentSource>,
        snapshot_store(config),
        config,
    )
    .await
    .context("Failed to open embedding index")?;
    Ok(Arc::new(service))
}

/// Store a new API key in the configuration file
#[inline]
pub fn set_api_key(config_dir: &Path, api_key: &str) -> Result<()> {
    let mut config = load_config(config_dir)?;
    config.openai.set_api_key(api_key.to_string());
    config.save().context("Failed to save configuration")?;

    println!("{}", style("✓ API key saved").green());
    println!("  API Key: {}", config.openai.masked_api_key());
    Ok(())
}

/// Reports reindex progress on a terminal progress bar
struct TerminalObserver {
    assume_yes: bool,
    bar: ProgressBar,
}

impl TerminalObserver {
    fn new(assume_yes: bool) -> Self {
        let bar = if console::user_attended_stderr() {
            ProgressBar::new(0).with_style(
                ProgressStyle::with_template("{bar:40} [{pos}/{len}] {percent}% {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        };
        Self { assume_yes, bar }
    }
}

#[async_trait]
impl ReindexObserver for TerminalObserver {
    async fn confirm(&self, estimate: &ReindexEstimate) -> bool {
        println!("📚 Documents: {}", estimate.documents);
        println!("   Already indexed: {}", estimate.already_indexed);
        println!("   To index: {}", estimate.pending());
        println!("   Tokens in corpus: {}", estimate.total_tokens);

        self.bar.set_length(estimate.pending() as u64);

        if self.assume_yes || estimate.pending() == 0 {
            return true;
        }

        let prompt = format!("Embed {} documents?", estimate.pending());
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(prompt)
                .default(true)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(e)) => {
                error!("Failed to read confirmation: {}", e);
                false
            }
            Err(e) => {
                error!("Confirmation prompt failed: {}", e);
                false
            }
        }
    }

    fn progress(&self, progress: &ReindexProgress) {
        self.bar.set_position(progress.processed as u64);
        self.bar.set_message(progress.document_key.clone());
        if !progress.succeeded {
            self.bar
                .println(format!("⚠️  Failed to index {}", progress.document_key));
        }
    }
}

/// Embed every document in the vault that is not cached yet
#[inline]
pub async fn reindex_vault(config_dir: &Path, vault_path: &Path, assume_yes: bool) -> Result<()> {
    let config = load_config(config_dir)?;
    let vault = FsVault::new(vault_path).context("Failed to open vault")?;
    let service = open_service(&config, vault).await?;

    let cancel = service.reindex().cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n📴 Cancelling after the current batch...");
            cancel.cancel();
        }
    });

    let observer = TerminalObserver::new(assume_yes);
    let result = service.reindex().run(&observer).await;
    observer.bar.finish_and_clear();
    interrupt.abort();

    let summary = result.context("Reindex failed")?;
    match summary.outcome {
        ReindexOutcome::Completed => println!("✅ Reindex complete"),
        ReindexOutcome::Cancelled => println!("🛑 Reindex cancelled"),
    }
    println!("   Indexed: {}", summary.indexed);
    if summary.failed > 0 {
        println!("   Failed: {} (will be retried on the next run)", summary.failed);
    }
    println!("   Total indexed documents: {}", service.indexed_keys().len());

    Ok(())
}

/// Run a single query against the saved index
#[inline]
pub async fn search(config_dir: &Path, query: &str, limit: Option<usize>) -> Result<()> {
    let config = load_config(config_dir)?;
    let cache = Arc::new(IndexCache::restore(snapshot_store(&config).as_ref()).await);

    if cache.is_empty() {
        println!("No documents have been indexed yet.");
        println!("Use 'note-search index <vault>' to build the index.");
        return Ok(());
    }

    let queries = QueryService::new(build_client(&config)?, cache, config.search.clone());
    let limit = limit.unwrap_or_else(|| queries.default_limit());
    let results = queries.search(query, limit).await.context("Search failed")?;

    if results.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for (position, result) in results.iter().enumerate() {
        println!(
            "{:>3}. {} {}",
            position + 1,
            style(&result.document_key).cyan(),
            style(format!("({:.4}, chunk {})", result.similarity, result.best_chunk)).dim()
        );
    }

    Ok(())
}

/// Keep the index current while the vault changes, until Ctrl+C
#[inline]
pub async fn watch_vault(config_dir: &Path, vault_path: &Path) -> Result<()> {
    let config = load_config(config_dir)?;
    let vault = FsVault::new(vault_path).context("Failed to open vault")?;
    let mut watcher = vault.watch().context("Failed to watch vault")?;
    let service = open_service(&config, vault).await?;

    service.mark_ready();
    println!("👀 Watching {} for changes", vault_path.display());
    println!("Press Ctrl+C to stop");

    loop {
        tokio::select! {
            event = watcher.next_event() => {
                let Some(event) = event else {
                    warn!("Vault watcher stopped");
                    break;
                };
                if service.handle_event(event.clone()) {
                    info!("Queued update: {:?}", event);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n📴 Received interrupt signal, shutting down...");
                break;
            }
        }
    }

    service
        .shutdown()
        .await
        .context("Failed to save embeddings")?;
    println!("✅ Shutdown complete");

    Ok(())
}

/// Explain a passage of a note using the completion model
#[inline]
pub async fn explain(config_dir: &Path, file: &Path, selection: &str) -> Result<()> {
    let config = load_config(config_dir)?;
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let parent = file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let vault = FsVault::new(parent).context("Failed to open note directory")?;
    let service = open_service(&config, vault).await?;

    let answer = service
        .explain_in_context(&text, selection)
        .await
        .context("Explain request failed")?;

    if answer.is_empty() {
        println!("Selection not found in {}", file.display());
    } else {
        println!("{answer}");
    }
    Ok(())
}

/// Show what is in the saved index
#[inline]
pub async fn show_status(config_dir: &Path) -> Result<()> {
    let config = load_config(config_dir)?;
    let store = JsonFileStore::new(config.snapshot_path());
    let cache = IndexCache::restore(&store).await;

    println!("{}", style("📊 Index Status").bold().cyan());
    println!("  Embedding model: {}", style(&config.openai.embedding_model).cyan());
    println!("  Snapshot: {}", style(store.path().display()).dim());
    println!("  Indexed documents: {}", style(cache.len()).cyan());

    for key in cache.keys() {
        let chunks = cache.get(&key).map_or(0, |entry| entry.chunk_vectors.len());
        println!("   • {} ({} chunks)", key, chunks);
    }

    Ok(())
}
