//! Mock implementations for testing.
//!
//! This module provides a mock [`TextModel`] that can be shared across test
//! files without duplication.

use async_trait::async_trait;
use parley::llm::TextModel;
use parley::types::{AppError, Result, Turn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mock model with configurable replies.
///
/// # Examples
///
/// ```ignore
/// // Replies with a fixed summary
/// let model = MockTextModel::new("user asked about refunds");
///
/// // Always fails
/// let model = MockTextModel::failing();
///
/// // Takes longer than any reasonable timeout
/// let model = MockTextModel::new("late").with_delay(Duration::from_secs(5));
/// ```
#[derive(Clone)]
pub struct MockTextModel {
    reply: String,
    should_fail: bool,
    embed_fails: bool,
    embed_malformed: bool,
    supports_embedding: bool,
    delay: Option<Duration>,
    chat_calls: Arc<AtomicUsize>,
    embed_calls: Arc<AtomicUsize>,
}

impl MockTextModel {
    /// Create a mock that replies with `reply`.
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            should_fail: false,
            embed_fails: false,
            embed_malformed: false,
            supports_embedding: true,
            delay: None,
            chat_calls: Arc::new(AtomicUsize::new(0)),
            embed_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock whose chat calls always fail.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new("")
        }
    }

    /// Sleep before answering a chat call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make embedding calls fail.
    pub fn with_failing_embeddings(mut self) -> Self {
        self.embed_fails = true;
        self
    }

    /// Return embeddings that contain `NaN`.
    pub fn with_malformed_embeddings(mut self) -> Self {
        self.embed_malformed = true;
        self
    }

    /// Report no embedding support.
    pub fn without_embeddings(mut self) -> Self {
        self.supports_embedding = false;
        self
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<dyn TextModel> {
        Arc::new(self)
    }
}

/// Deterministic bag-of-letters embedding: similar spellings land close.
pub fn letter_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 26];
    for c in text.chars().filter(|c| c.is_ascii_alphabetic()) {
        vector[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
    }
    vector
}

#[async_trait]
impl TextModel for MockTextModel {
    async fn chat(&self, _turns: &[Turn]) -> Result<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }
        Ok(self.reply.clone())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.embed_fails {
            return Err(AppError::LLM("Mock embedding failure".to_string()));
        }
        let mut vector = letter_embedding(text);
        if self.embed_malformed {
            vector[0] = f32::NAN;
        }
        Ok(vector)
    }

    fn supports_embedding(&self) -> bool {
        self.supports_embedding
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
