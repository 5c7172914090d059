/// Tracing subscriber initialisation.
pub mod logging;
/// Cosine similarity, importance clamping and decay scoring.
pub mod similarity;
/// TOML configuration and the reloadable config manager.
pub mod toml_config;

pub use toml_config::{
    ConfigError, ConfigManager, LoggingConfig, MemoryConfig, ParleyConfig, SessionConfig,
};
