//! services/engine/src/config.rs
//!
//! Defines the engine's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub queue_path: PathBuf,
    pub arcs_path: PathBuf,
    pub entries_path: PathBuf,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub metadata_model: String,
    pub chapter_model: String,
    pub metadata_mode: MetadataMode,
    pub user_id: String,
    pub request_timeout: Duration,
}

/// Which metadata extractor the composition root wires in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataMode {
    Local,
    Remote,
}

impl Config {
    /// The metadata mode actually wired in: remote extraction needs an API
    /// key, so without one the on-device analyzer is used regardless of the
    /// configured mode.
    pub fn effective_metadata_mode(&self) -> MetadataMode {
        match self.metadata_mode {
            MetadataMode::Remote if self.openai_api_key.is_some() => MetadataMode::Remote,
            _ => MetadataMode::Local,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Storage Paths ---
        let queue_path = std::env::var("QUEUE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/offline_queue.json"));
        let arcs_path = std::env::var("ARCS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/story_arcs.json"));
        let entries_path = std::env::var("ENTRIES_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/journal_entries.json"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let metadata_model =
            std::env::var("METADATA_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let chapter_model = std::env::var("CHAPTER_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let metadata_mode_str =
            std::env::var("METADATA_MODE").unwrap_or_else(|_| "local".to_string());
        let metadata_mode = match metadata_mode_str.to_lowercase().as_str() {
            "local" => MetadataMode::Local,
            "remote" => MetadataMode::Remote,
            other => {
                return Err(ConfigError::InvalidValue(
                    "METADATA_MODE".to_string(),
                    format!("'{}' is not 'local' or 'remote'", other),
                ))
            }
        };

        let user_id = std::env::var("USER_ID").unwrap_or_else(|_| "local-user".to_string());

        let timeout_secs_str =
            std::env::var("REQUEST_TIMEOUT_SECS").unwrap_or_else(|_| "120".to_string());
        let timeout_secs = timeout_secs_str.parse::<u64>().map_err(|e| {
            ConfigError::InvalidValue("REQUEST_TIMEOUT_SECS".to_string(), e.to_string())
        })?;

        Ok(Self {
            queue_path,
            arcs_path,
            entries_path,
            log_level,
            openai_api_key,
            metadata_model,
            chapter_model,
            metadata_mode,
            user_id,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}
