//! Model-backed fact extraction and recall
//!
//! The [`MemoryStore`] only deals in vectors. This module is the layer that
//! talks to a [`TextModel`]: it asks the model which facts in a conversation
//! are worth keeping, embeds them, and embeds recall queries.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{AddOutcome, Memory, MemoryStore};
use crate::llm::TextModel;
use crate::types::{AppError, Result, Turn};
use crate::utils::similarity::{clamp_importance, is_well_formed};
use crate::utils::MemoryConfig;

/// Importance used when the model gives none (or a non-positive one)
const DEFAULT_IMPORTANCE: f32 = 0.5;

/// One fact as returned by the model
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtractedFact {
    pub content: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub importance: Option<f32>,
}

impl ExtractedFact {
    fn importance(&self) -> f32 {
        match self.importance {
            Some(value) if value > 0.0 => clamp_importance(value),
            _ => DEFAULT_IMPORTANCE,
        }
    }
}

pub struct MemoryExtractor {
    model: Arc<dyn TextModel>,
    semantic_search: bool,
}

impl MemoryExtractor {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self {
            model,
            semantic_search: true,
        }
    }

    pub fn from_config(model: Arc<dyn TextModel>, config: &MemoryConfig) -> Self {
        Self::new(model).with_semantic_search(config.semantic_search)
    }

    /// When disabled, [`recall`](Self::recall) ranks by strategy instead of similarity
    pub fn with_semantic_search(mut self, enabled: bool) -> Self {
        self.semantic_search = enabled;
        self
    }

    /// Ask the model for the facts in `conversation` worth remembering.
    ///
    /// Returned memories are embedded when the model supports it. A failed
    /// embedding, or one with non-finite components, leaves that memory's
    /// vector empty.
    pub async fn extract(&self, user_id: &str, conversation: &str) -> Result<Vec<Memory>> {
        if user_id.trim().is_empty() {
            return Err(AppError::InvalidInput("user id must not be empty".to_string()));
        }
        if conversation.trim().is_empty() {
            return Ok(Vec::new());
        }

        let reply = self
            .model
            .chat(&[Turn::user(extraction_prompt(conversation))])
            .await?;
        let facts = parse_facts(&reply)?;

        let mut memories = Vec::with_capacity(facts.len());
        for fact in facts {
            let content = fact.content.trim();
            if content.is_empty() {
                continue;
            }
            let mut memory = Memory::new(user_id, content)
                .with_topics(
                    fact.topics
                        .iter()
                        .map(|t| t.trim())
                        .filter(|t| !t.is_empty()),
                )
                .with_importance(fact.importance());

            if self.model.supports_embedding() {
                match self.model.embed(&memory.content).await {
                    Ok(vector) if is_well_formed(&vector) => memory.vector = vector,
                    Ok(_) => warn!(
                        user_id,
                        model = self.model.model_name(),
                        "Embedding contains non-finite values; storing memory without a vector"
                    ),
                    Err(e) => warn!(
                        user_id,
                        model = self.model.model_name(),
                        error = %e,
                        "Embedding failed; storing memory without a vector"
                    ),
                }
            }
            memories.push(memory);
        }

        debug!(user_id, count = memories.len(), "Extracted memories");
        Ok(memories)
    }

    /// Extract facts from `conversation` and add each one to `store`
    pub async fn remember(
        &self,
        store: &MemoryStore,
        user_id: &str,
        conversation: &str,
    ) -> Result<Vec<AddOutcome>> {
        let memories = self.extract(user_id, conversation).await?;
        let outcomes = memories
            .into_iter()
            .map(|memory| store.add(memory))
            .collect::<Result<Vec<_>>>()?;

        if !outcomes.is_empty() {
            let merged = outcomes
                .iter()
                .filter(|o| matches!(o, AddOutcome::Merged(_)))
                .count();
            info!(
                user_id,
                stored = outcomes.len() - merged,
                merged,
                "Remembered facts from conversation"
            );
        }
        Ok(outcomes)
    }

    /// Memories relevant to a free-text query
    pub async fn recall(
        &self,
        store: &MemoryStore,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        if !self.semantic_search || !self.model.supports_embedding() {
            return Ok(store.get_memories(user_id, limit));
        }

        let vector = self
            .model
            .embed(query)
            .await
            .map_err(|e| AppError::LLM(format!("failed to embed query: {}", e)))?;
        if !is_well_formed(&vector) {
            return Err(AppError::LLM(
                "query embedding contains non-finite values".to_string(),
            ));
        }
        store.semantic_search(user_id, &vector, limit)
    }
}

fn extraction_prompt(conversation: &str) -> String {
    format!(
        r#"Extract the information worth remembering about the user from the conversation below.

Conversation:
{conversation}

Look for:
1. Preferences (likes and dislikes)
2. Personal details (name, occupation, interests)
3. Decisions and plans
4. Anything else worth remembering

Reply with a JSON array only, for example:
[
  {{"content": "The user likes programming in Go", "topics": ["programming", "go", "preference"], "importance": 0.8}}
]"#
    )
}

/// Parse the JSON array out of a reply that may be wrapped in prose or code fences
fn parse_facts(reply: &str) -> Result<Vec<ExtractedFact>> {
    let start = reply.find('[');
    let end = reply.rfind(']');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => {
            return Err(AppError::LLM(
                "extraction reply does not contain a JSON array".to_string(),
            ))
        }
    };

    serde_json::from_str(json)
        .map_err(|e| AppError::LLM(format!("failed to parse extracted facts: {}", e)))
}
