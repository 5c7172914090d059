//! CLI module for parley
//!
//! Argument parsing for the `parley` binary, plus the handlers behind each
//! subcommand.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::utils::logging::init_tracing;
use crate::utils::toml_config::{ConfigError, ParleyConfig};
use crate::AppState;

/// Parley - conversation sessions and user memory
#[derive(Parser, Debug)]
#[command(
    name = "parley",
    version,
    about = "Parley - conversation sessions and user memory",
    long_about = "Concurrent session store with background summarization and a per-user\n\
                  semantic memory store.\n\n\
                  Run without arguments to build the stores from the configuration and report\n\
                  their state, or use 'config' to inspect the effective configuration.",
    after_help = "EXAMPLES:\n    \
                  parley                          # Build the stores from parley.toml\n    \
                  parley config --validate        # Check parley.toml\n    \
                  parley --config my.toml config  # Show a custom config file"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "parley.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show configuration information
    Config {
        /// Show the full configuration
        #[arg(short = 'f', long)]
        full: bool,

        /// Validate the configuration file
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Configuration resolved for a run
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: ParleyConfig,
    /// False when the file was missing and defaults were used
    pub from_file: bool,
}

/// Load the configuration file, falling back to defaults when it is missing,
/// then apply environment overrides. Does not log.
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let (config, from_file) = match ParleyConfig::load(path) {
        Ok(config) => (config, true),
        Err(ConfigError::FileNotFound(_)) => (ParleyConfig::default(), false),
        Err(e) => return Err(e),
    };
    Ok(LoadedConfig {
        config: config.apply_env_overrides()?,
        from_file,
    })
}

fn init_logging(loaded: &LoadedConfig, path: &Path, verbose: bool) {
    init_tracing(&loaded.config.logging, verbose);
    if !loaded.from_file {
        warn!(path = %path.display(), "Configuration file not found; using defaults");
    }
}

/// Execute the parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Config { full, validate }) => {
            if validate {
                // Strict: the file itself must exist and be valid
                ParleyConfig::load(&cli.config).with_context(|| {
                    format!("invalid configuration at {}", cli.config.display())
                })?;
                println!("Configuration at {} is valid", cli.config.display());
                if !full {
                    return Ok(());
                }
            }

            let loaded = load_config(&cli.config)?;
            init_logging(&loaded, &cli.config, cli.verbose);
            print_config(&loaded.config, full);
            Ok(())
        }
        None => {
            let loaded = load_config(&cli.config)
                .with_context(|| format!("failed to load {}", cli.config.display()))?;
            init_logging(&loaded, &cli.config, cli.verbose);

            let state = AppState::from_config(loaded.config, None);
            let config = state.config.config();
            info!(
                version = env!("CARGO_PKG_VERSION"),
                max_history = config.session.max_history,
                summary_threshold = config.session.summary_threshold,
                strategy = %config.memory.strategy,
                "Parley stores ready"
            );

            let stats = state.sessions.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            state.sessions.shutdown();
            Ok(())
        }
    }
}

fn print_config(config: &ParleyConfig, full: bool) {
    if full {
        print!("{}", config.to_toml_string());
        return;
    }

    println!("session.max_history       = {}", config.session.max_history);
    println!("session.summary_threshold = {}", config.session.summary_threshold);
    println!("session.auto_summary      = {}", config.session.auto_summary);
    println!("memory.strategy           = {}", config.memory.strategy);
    println!("memory.semantic_search    = {}", config.memory.semantic_search);
    println!("logging.level             = {}", config.logging.level);
}
