
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password};

use super::{Config, IndexingConfig, OpenAiConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Note Search Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("OpenAI Configuration").bold().yellow());
    eprintln!("Configure access to the embedding and completion service.");
    eprintln!();

    configure_openai(&mut config.openai)?;

    eprintln!();
    eprintln!("{}", style("Indexing Configuration").bold().yellow());
    eprintln!();

    configure_indexing(&mut config.indexing)?;

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("OpenAI Settings:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.openai.base_url).cyan());
    let api_key = match config.openai.masked_api_key() {
        "" if !config.openai.resolved_api_key().is_empty() => "<FROM ENVIRONMENT>",
        "" => "<NOT SET>",
        masked => masked,
    };
    eprintln!("  API Key: {}", style(api_key).cyan());
    eprintln!(
        "  Embedding Model: {}",
        style(&config.openai.embedding_model).cyan()
    );
    eprintln!(
        "  Completion Model: {}",
        style(&config.openai.completion_model).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Indexing Settings:").bold().yellow());
    eprintln!(
        "  Chunk Token Bound: {}",
        style(config.indexing.chunk_token_bound()).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.indexing.batch_size).cyan());
    eprintln!(
        "  Checkpoint Interval: {}",
        style(config.indexing.checkpoint_interval).cyan()
    );
    eprintln!(
        "  Update Debounce: {}ms",
        style(config.indexing.update_debounce_ms).cyan()
    );
    eprintln!(
        "  Extensions: {}",
        style(config.indexing.extensions.join(", ")).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Search Settings:").bold().yellow());
    eprintln!("  Debounce: {}ms", style(config.search.debounce_ms).cyan());
    eprintln!(
        "  Default Limit: {}",
        style(config.search.default_limit).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_openai(openai: &mut OpenAiConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("API base URL")
        .default(openai.base_url.clone())
        .validate_with(|input: &String| -> Result<(), String> {
            let temp_config = OpenAiConfig {
                base_url: input.clone(),
                ..OpenAiConfig::default()
            };
            temp_config.base_url().map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text()?;

    let api_key = Password::new()
        .with_prompt("API key (leave empty to keep the current key)")
        .allow_empty_password(true)
        .interact()?;

    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(openai.embedding_model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let completion_model: String = Input::new()
        .with_prompt("Completion model")
        .default(openai.completion_model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    openai.set_base_url(base_url)?;
    if !api_key.trim().is_empty() {
        openai.set_api_key(api_key);
    }
    openai.set_embedding_model(embedding_model)?;
    openai.set_completion_model(completion_model)?;

    Ok(())
}

fn configure_indexing(indexing: &mut IndexingConfig) -> Result<()> {
    let batch_size: usize = Input::new()
        .with_prompt("Documents indexed concurrently during a full reindex")
        .default(indexing.batch_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 64 {
                Err("Batch size must be 64 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let update_debounce_ms: u64 = Input::new()
        .with_prompt("Quiet period before re-embedding an edited note (ms)")
        .default(indexing.update_debounce_ms)
        .interact_text()?;

    indexing.set_batch_size(batch_size)?;
    indexing.set_update_debounce_ms(update_debounce_ms)?;

    Ok(())
}
