//! # Parley
//!
//! Conversation state and long-term user memory for chat services.
//!
//! Parley is the in-process core that sits between a chat API and its
//! language models. It keeps every conversation bounded and consistent under
//! concurrent access, and remembers deduplicated facts about each user.
//!
//! ## Overview
//!
//! - [`SessionStore`] - per-conversation rolling history, versioned
//!   key/value state and a background-maintained summary
//! - [`MemoryStore`] - per-user facts, merged on near-duplicate insert,
//!   searchable by embedding similarity and ranked by a pluggable
//!   [`OptimizationStrategy`]
//! - [`MemoryExtractor`] - asks a [`TextModel`] which facts in a
//!   conversation are worth keeping
//!
//! Models are consumed through the [`TextModel`] trait; Parley never talks
//! to a provider directly and performs no network I/O of its own.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use parley::{AppState, ParleyConfig, Turn};
//!
//! #[tokio::main]
//! async fn main() -> parley::Result<()> {
//!     let state = AppState::from_config(ParleyConfig::default(), Some(my_model()));
//!
//!     state.sessions.add_message("s1", Turn::user("hi"))?;
//!     state.sessions.add_message("s1", Turn::assistant("hello"))?;
//!
//!     // Summary (if any) first, then the live turns
//!     let context = state.sessions.get_history("s1")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Everything is driven by `parley.toml` (see [`ParleyConfig`]); every field
//! has a default and `PARLEY_*` environment variables override the file.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Command-line interface of the `parley` binary.
pub mod cli;
/// The model seam.
pub mod llm;
/// Per-user semantic memory.
pub mod memory;
/// Concurrent session store and background summarization.
pub mod session;
/// Core types (turns, errors).
pub mod types;
/// Configuration, logging and similarity helpers.
pub mod utils;

// Re-export commonly used types
pub use llm::TextModel;
pub use memory::{AddOutcome, Memory, MemoryExtractor, MemoryStore, OptimizationStrategy};
pub use session::{Session, SessionState, SessionStats, SessionStore};
pub use types::{AppError, MessageRole, Result, Turn};
pub use utils::toml_config::{ConfigManager, ParleyConfig};

use std::sync::Arc;

/// Application state owned by the composition root
///
/// Every instance holds its own stores; nothing is process-global, so tests
/// can build as many independent states as they like.
#[derive(Clone)]
pub struct AppState {
    /// Configuration with reload support
    pub config: Arc<ConfigManager>,
    /// Conversation sessions
    pub sessions: Arc<SessionStore>,
    /// Per-user memories
    pub memories: Arc<MemoryStore>,
}

impl AppState {
    /// Build fresh stores from a configuration
    pub fn from_config(config: ParleyConfig, summary_model: Option<Arc<dyn TextModel>>) -> Self {
        Self::from_manager(ConfigManager::from_config(config), summary_model)
    }

    /// Build fresh stores from the current configuration of `manager`
    pub fn from_manager(
        manager: ConfigManager,
        summary_model: Option<Arc<dyn TextModel>>,
    ) -> Self {
        let config = manager.config();

        let sessions = SessionStore::new(config.session.clone());
        sessions.set_summary_model(summary_model);

        Self {
            config: Arc::new(manager),
            sessions: Arc::new(sessions),
            memories: Arc::new(MemoryStore::from_config(&config.memory)),
        }
    }
}
