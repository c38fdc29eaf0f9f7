
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const CONFIG_DIR_ENV: &str = "NOTE_SEARCH_CONFIG_DIR";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
const MASKED_API_KEY: &str = "<KEY_SAVED>";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub embedding_model: String,
    pub completion_model: String,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1/".to_string(),
            api_key: String::new(),
            embedding_model: "text-embedding-ada-002".to_string(),
            completion_model: "gpt-3.5-turbo".to_string(),
            timeout_seconds: 30,
            retry_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexingConfig {
    /// Hard input limit of the embedding model, in tokens
    pub max_tokens: usize,
    /// Tokens kept free below `max_tokens` when chunking
    pub token_margin: usize,
    /// Documents indexed concurrently during a bulk reindex
    pub batch_size: usize,
    /// Documents between snapshot checkpoints during a bulk reindex
    pub checkpoint_interval: usize,
    /// Quiet period before a modified document is re-embedded
    pub update_debounce_ms: u64,
    /// File extensions (without the dot) that are indexed
    pub extensions: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8191,
            token_margin: 100,
            batch_size: 3,
            checkpoint_interval: 100,
            update_debounce_ms: 20_000,
            extensions: vec!["md".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub debounce_ms: u64,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid max tokens: {0} (must be between 16 and 131072)")]
    InvalidMaxTokens(usize),
    #[error("Token margin ({0}) must be smaller than max tokens ({1})")]
    TokenMarginTooLarge(usize, usize),
    #[error("Invalid batch size: {0} (must be between 1 and 64)")]
    InvalidBatchSize(usize),
    #[error("Invalid checkpoint interval: {0} (must be at least 1)")]
    InvalidCheckpointInterval(usize),
    #[error("Invalid debounce delay: {0}ms (must be at most 600000)")]
    InvalidDebounce(u64),
    #[error("At least one indexable file extension is required")]
    NoExtensions,
    #[error("Invalid search limit: {0} (must be between 1 and 1000)")]
    InvalidSearchLimit(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            openai: OpenAiConfig::default(),
            indexing: IndexingConfig::default(),
            search: SearchConfig::default(),
            base_dir: Self::default_dir().unwrap_or_else(|_| PathBuf::from(".note-search")),
        }
    }
}

impl Config {
    /// Default configuration directory, honouring `NOTE_SEARCH_CONFIG_DIR`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = env::var_os(CONFIG_DIR_ENV).filter(|dir| !dir.is_empty()) {
            return Ok(PathBuf::from(dir));
        }

        dirs::config_dir()
            .map(|dir| dir.join("note-search"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.indexing.validate()?;
        self.search.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path of the persisted embedding snapshot
    #[inline]
    pub fn snapshot_path(&self) -> PathBuf {
        self.get_base_dir().join("embeddings.json")
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.completion_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.completion_model.clone()));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }

        Ok(url)
    }

    /// The configured key, falling back to `OPENAI_API_KEY` when none is saved
    pub fn resolved_api_key(&self) -> String {
        if !self.api_key.trim().is_empty() {
            return self.api_key.trim().to_string();
        }

        env::var(API_KEY_ENV)
            .map(|key| key.trim().to_string())
            .unwrap_or_default()
    }

    /// The key as it may be displayed: never the key itself
    pub fn masked_api_key(&self) -> &'static str {
        if self.api_key.trim().is_empty() {
            ""
        } else {
            MASKED_API_KEY
        }
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.api_key = api_key.trim().to_string();
    }

    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let temp_config = OpenAiConfig {
            base_url: base_url.clone(),
            ..self.clone()
        };
        temp_config.base_url()?;
        self.base_url = base_url;
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.embedding_model = model;
        Ok(())
    }

    pub fn set_completion_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.completion_model = model;
        Ok(())
    }
}

impl IndexingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(16..=131_072).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        if self.token_margin >= self.max_tokens {
            return Err(ConfigError::TokenMarginTooLarge(
                self.token_margin,
                self.max_tokens,
            ));
        }

        if !(1..=64).contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if self.checkpoint_interval == 0 {
            return Err(ConfigError::InvalidCheckpointInterval(
                self.checkpoint_interval,
            ));
        }

        if self.update_debounce_ms > 600_000 {
            return Err(ConfigError::InvalidDebounce(self.update_debounce_ms));
        }

        if self.extensions.iter().all(|ext| ext.trim().is_empty()) {
            return Err(ConfigError::NoExtensions);
        }

        Ok(())
    }

    /// Token bound used for chunking, kept below the model's hard maximum
    pub fn chunk_token_bound(&self) -> usize {
        self.max_tokens.saturating_sub(self.token_margin).max(1)
    }

    pub fn update_debounce(&self) -> Duration {
        Duration::from_millis(self.update_debounce_ms)
    }

    /// Whether a document with this key has an indexable extension
    pub fn is_indexable(&self, document_key: &str) -> bool {
        Path::new(document_key)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
            })
    }

    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<(), ConfigError> {
        if !(1..=64).contains(&batch_size) {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_update_debounce_ms(&mut self, delay_ms: u64) -> Result<(), ConfigError> {
        if delay_ms > 600_000 {
            return Err(ConfigError::InvalidDebounce(delay_ms));
        }
        self.update_debounce_ms = delay_ms;
        Ok(())
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&self.default_limit) {
            return Err(ConfigError::InvalidSearchLimit(self.default_limit));
        }

        if self.debounce_ms > 600_000 {
            return Err(ConfigError::InvalidDebounce(self.debounce_ms));
        }

        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
