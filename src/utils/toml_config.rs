//! TOML-based configuration for parley
//!
//! This module provides declarative configuration for the session store, the
//! memory store and logging via a TOML file (`parley.toml`). Every field has a
//! default, so an empty file (or no file at all) yields a working setup.
//!
//! # Reloading
//!
//! Use `ConfigManager` for lock-free access to the current configuration and
//! to swap in a freshly loaded file at runtime.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::memory::OptimizationStrategy;

/// Root configuration structure loaded from parley.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============= Session Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of live turns kept per session
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// History length above which evicted turns are handed to the summarizer
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,

    /// Whether background summarization runs when a model is configured
    #[serde(default = "default_true")]
    pub auto_summary: bool,

    /// Most recent turns included in one summarization prompt
    #[serde(default = "default_summary_prompt_turns")]
    pub summary_prompt_turns: usize,

    /// Summarization jobs allowed to run concurrently
    #[serde(default = "default_summary_workers")]
    pub summary_workers: usize,

    /// Jobs buffered before new ones are dropped
    #[serde(default = "default_summary_queue_capacity")]
    pub summary_queue_capacity: usize,

    /// Upper bound for a single summarization call
    #[serde(default = "default_summary_timeout_ms")]
    pub summary_timeout_ms: u64,
}

fn default_max_history() -> usize {
    20
}

fn default_summary_threshold() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_summary_prompt_turns() -> usize {
    10
}

fn default_summary_workers() -> usize {
    4
}

fn default_summary_queue_capacity() -> usize {
    256
}

fn default_summary_timeout_ms() -> u64 {
    30_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            summary_threshold: default_summary_threshold(),
            auto_summary: default_true(),
            summary_prompt_turns: default_summary_prompt_turns(),
            summary_workers: default_summary_workers(),
            summary_queue_capacity: default_summary_queue_capacity(),
            summary_timeout_ms: default_summary_timeout_ms(),
        }
    }
}

impl SessionConfig {
    /// Set the history bound
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    /// Set the summarization threshold
    pub fn with_summary_threshold(mut self, threshold: usize) -> Self {
        self.summary_threshold = threshold;
        self
    }

    /// Set the per-call summarization timeout
    pub fn with_summary_timeout(mut self, timeout: Duration) -> Self {
        self.summary_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the number of concurrent summarization jobs
    pub fn with_summary_workers(mut self, workers: usize) -> Self {
        self.summary_workers = workers;
        self
    }

    pub fn summary_timeout(&self) -> Duration {
        Duration::from_millis(self.summary_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("session.max_history", self.max_history as u64),
            ("session.summary_threshold", self.summary_threshold as u64),
            ("session.summary_prompt_turns", self.summary_prompt_turns as u64),
            ("session.summary_workers", self.summary_workers as u64),
            (
                "session.summary_queue_capacity",
                self.summary_queue_capacity as u64,
            ),
            ("session.summary_timeout_ms", self.summary_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.summary_threshold > self.max_history {
            return Err(ConfigError::ValidationError(format!(
                "session.summary_threshold ({}) must not exceed session.max_history ({})",
                self.summary_threshold, self.max_history
            )));
        }

        Ok(())
    }
}

// ============= Memory Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Read-time optimization strategy (`importance`, `time_decay`, `summarization`)
    #[serde(default)]
    pub strategy: OptimizationStrategy,

    /// Whether recall embeds queries; when false recall returns ranked memories
    #[serde(default = "default_true")]
    pub semantic_search: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            strategy: OptimizationStrategy::default(),
            semantic_search: default_true(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Config(err.to_string())
    }
}

impl ParleyConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;

        Ok(config)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ParleyConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "logging.level must not be empty".to_string(),
            ));
        }
        self.session.validate()
    }

    /// Apply `PARLEY_*` environment overrides (after loading `.env` if present)
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(value) = std::env::var("PARLEY_MAX_HISTORY") {
            self.session.max_history = parse_env("PARLEY_MAX_HISTORY", &value)?;
        }
        if let Ok(value) = std::env::var("PARLEY_SUMMARY_THRESHOLD") {
            self.session.summary_threshold = parse_env("PARLEY_SUMMARY_THRESHOLD", &value)?;
        }
        if let Ok(value) = std::env::var("PARLEY_MEMORY_STRATEGY") {
            self.memory.strategy = OptimizationStrategy::from_name(&value);
        }

        self.validate()?;
        Ok(self)
    }

    /// Render the configuration back to TOML
    pub fn to_toml_string(&self) -> String {
        // Serializing plain structs with string keys cannot fail
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn parse_env(name: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{} must be a non-negative integer, got '{}'", name, value))
    })
}

// ============= Configuration Manager =============

/// Thread-safe configuration holder with manual reload support
pub struct ConfigManager {
    config: Arc<ArcSwap<ParleyConfig>>,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = ParleyConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: Some(path),
        })
    }

    /// Create a config manager directly from a config (no backing file)
    pub fn from_config(config: ParleyConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: None,
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<ParleyConfig> {
        self.config.load_full()
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Reload the configuration from disk, keeping the old one on failure
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.config_path else {
            warn!("Reload requested for a config without a backing file");
            return Ok(());
        };

        info!("Reloading configuration from {:?}", path);
        let new_config = ParleyConfig::load(path)?;
        self.config.store(Arc::new(new_config));
        info!("Configuration reloaded successfully");
        Ok(())
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
        }
    }
}
