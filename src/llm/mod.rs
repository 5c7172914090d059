//! Text Model Abstraction
//!
//! Chat and embedding providers are external collaborators. This module only
//! defines the seam the stores consume: [`TextModel`]. Provider clients
//! (OpenAI, Ollama, ...) live in the surrounding service and implement it.
//!
//! # Example
//!
//! ```ignore
//! use parley::llm::TextModel;
//! use std::sync::Arc;
//!
//! let model: Arc<dyn TextModel> = Arc::new(MyOllamaClient::new(..));
//! let store = SessionStore::new(config).with_summary_model(model);
//! ```

/// Core text model trait.
pub mod client;

pub use client::{disabled, DisabledModel, TextModel};
