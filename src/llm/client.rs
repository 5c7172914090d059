//! Text model abstraction consumed by the session and memory stores
//!
//! The core never talks to a provider directly. Anything that can answer a
//! chat request and (optionally) embed text can be plugged in:
//! - **Summarization**: `SessionStore` calls [`TextModel::chat`] from its
//!   background queue
//! - **Extraction / recall**: `MemoryExtractor` calls both `chat` and
//!   [`TextModel::embed`]

use crate::types::{AppError, Result, Turn};
use async_trait::async_trait;
use std::sync::Arc;

/// Generic text model trait for provider abstraction
///
/// Implementations are shared as `Arc<dyn TextModel>` across the store and its
/// background workers, so they must be cheap to call concurrently.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Generate a reply for the given conversation
    async fn chat(&self, turns: &[Turn]) -> Result<String>;

    /// Embed a piece of text into a fixed-length vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Whether [`TextModel::embed`] is backed by a real embedding endpoint
    fn supports_embedding(&self) -> bool {
        true
    }

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// A model that refuses every call.
///
/// Useful as an explicit "no model" value where an `Arc<dyn TextModel>` is
/// required, e.g. wiring a service before providers are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledModel;

#[async_trait]
impl TextModel for DisabledModel {
    async fn chat(&self, _turns: &[Turn]) -> Result<String> {
        Err(AppError::LLM("no text model configured".to_string()))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(AppError::LLM("no embedding model configured".to_string()))
    }

    fn supports_embedding(&self) -> bool {
        false
    }

    fn model_name(&self) -> &str {
        "disabled"
    }
}

/// Convenience constructor for the disabled model as a trait object
pub fn disabled() -> Arc<dyn TextModel> {
    Arc::new(DisabledModel)
}
