//! Per-user semantic memory
//!
//! [`MemoryStore`] keeps deduplicated facts about each user. Inserting a fact
//! whose embedding is within [`MERGE_THRESHOLD`] of an existing one folds it
//! into that fact instead of storing a near-duplicate. Reads either rank by
//! similarity to a query vector ([`MemoryStore::semantic_search`]) or apply
//! the configured [`OptimizationStrategy`] ([`MemoryStore::get_memories`]).
//!
//! The store never calls a model. Embeddings are computed by the caller (see
//! [`MemoryExtractor`]) and handed in as plain vectors.

pub mod extractor;
pub mod strategy;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::types::{AppError, Result};
use crate::utils::similarity::{
    clamp_importance, cosine_similarity, is_near_duplicate, is_well_formed, MERGE_THRESHOLD,
};
use crate::utils::MemoryConfig;

pub use extractor::{ExtractedFact, MemoryExtractor};
pub use strategy::OptimizationStrategy;

/// Separator placed between merged contents
pub const MERGE_SEPARATOR: &str = " | ";

/// A single fact about a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub topics: BTreeSet<String>,
    /// In [0, 1]
    pub importance: f32,
    /// Embedding of `content`; empty when none was available
    #[serde(default)]
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

impl Memory {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            content: content.into(),
            topics: BTreeSet::new(),
            importance: 0.5,
            vector: Vec::new(),
            created_at: now,
            updated_at: now,
            accessed_at: now,
            access_count: 0,
        }
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics.extend(topics.into_iter().map(Into::into));
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = clamp_importance(importance);
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    fn absorb(&mut self, other: Memory) {
        let repeated = self
            .content
            .split(MERGE_SEPARATOR)
            .any(|part| part.trim() == other.content.trim());
        if !repeated {
            self.content = format!("{}{}{}", self.content, MERGE_SEPARATOR, other.content);
        }
        self.topics.extend(other.topics);
        self.importance = self.importance.max(other.importance);
        self.updated_at = Utc::now();
    }
}

/// Result of [`MemoryStore::add`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored as a new memory with this id
    Inserted(String),
    /// Folded into the existing memory with this id
    Merged(String),
}

impl AddOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Inserted(id) | Self::Merged(id) => id,
        }
    }
}

type UserMemories = Arc<Mutex<Vec<Memory>>>;

/// Concurrent per-user memory store
///
/// The user map sits behind an `RwLock`; each user's collection has its own
/// `Mutex`, so operations on different users never wait on each other.
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserMemories>>,
    strategy: RwLock<OptimizationStrategy>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(OptimizationStrategy::default())
    }
}

impl MemoryStore {
    pub fn new(strategy: OptimizationStrategy) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            strategy: RwLock::new(strategy),
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.strategy)
    }

    fn user(&self, user_id: &str) -> Option<UserMemories> {
        self.users.read().get(user_id).cloned()
    }

    fn user_or_create(&self, user_id: &str) -> UserMemories {
        if let Some(memories) = self.user(user_id) {
            return memories;
        }
        let mut users = self.users.write();
        Arc::clone(users.entry(user_id.to_string()).or_default())
    }

    /// Insert a memory, merging it into the first existing near-duplicate.
    ///
    /// Items with an empty vector never merge by similarity, but an item whose
    /// id is already stored merges into that memory, so adding the same item
    /// twice leaves one copy. Caller-supplied ids and timestamps are kept
    /// as-is on insert.
    pub fn add(&self, mut item: Memory) -> Result<AddOutcome> {
        if item.user_id.trim().is_empty() {
            return Err(AppError::InvalidInput("memory user id must not be empty".to_string()));
        }
        if item.id.trim().is_empty() {
            return Err(AppError::InvalidInput("memory id must not be empty".to_string()));
        }
        if item.content.trim().is_empty() {
            return Err(AppError::InvalidInput("memory content must not be empty".to_string()));
        }
        if !is_well_formed(&item.vector) {
            return Err(AppError::InvalidInput(
                "memory vector contains non-finite values".to_string(),
            ));
        }
        item.importance = clamp_importance(item.importance);

        let memories = self.user_or_create(&item.user_id);
        let mut memories = memories.lock();

        // A near-duplicate wins; otherwise an item re-added under its own id merges into itself
        let target = match memories
            .iter()
            .position(|m| is_near_duplicate(&m.vector, &item.vector))
        {
            Some(index) => Some(index),
            None => memories.iter().position(|m| m.id == item.id),
        };

        if let Some(index) = target {
            let existing = &mut memories[index];
            debug!(
                user_id = %item.user_id,
                memory_id = %existing.id,
                threshold = MERGE_THRESHOLD,
                "Merging near-duplicate memory"
            );
            existing.absorb(item);
            return Ok(AddOutcome::Merged(existing.id.clone()));
        }

        let id = item.id.clone();
        memories.push(item);
        Ok(AddOutcome::Inserted(id))
    }

    /// The `limit` memories most similar to `query`, best first.
    ///
    /// Every memory of the user is scored, so every one of them has its
    /// access statistics bumped, including those cut by `limit`.
    pub fn semantic_search(&self, user_id: &str, query: &[f32], limit: usize) -> Result<Vec<Memory>> {
        if !is_well_formed(query) {
            return Err(AppError::InvalidInput(
                "query vector contains non-finite values".to_string(),
            ));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let Some(memories) = self.user(user_id) else {
            return Ok(Vec::new());
        };
        let mut memories = memories.lock();

        let now = Utc::now();
        let mut scored: Vec<(f32, usize)> = memories
            .iter_mut()
            .enumerate()
            .map(|(idx, memory)| {
                memory.accessed_at = now;
                memory.access_count += 1;
                (cosine_similarity(query, &memory.vector), idx)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, idx)| memories[idx].clone())
            .collect())
    }

    /// The user's memories after applying the current strategy.
    ///
    /// `limit == 0` returns the whole optimized set. Storage is not changed.
    pub fn get_memories(&self, user_id: &str, limit: usize) -> Vec<Memory> {
        let Some(memories) = self.user(user_id) else {
            return Vec::new();
        };
        let snapshot = memories.lock().clone();

        let mut optimized = self.strategy().apply(&snapshot, Utc::now());
        if limit > 0 {
            optimized.truncate(limit);
        }
        optimized
    }

    /// Replace the user's memories with the optimized set. Returns how many remain.
    pub fn optimize(&self, user_id: &str) -> Result<usize> {
        let Some(memories) = self.user(user_id) else {
            return Ok(0);
        };
        let strategy = self.strategy();
        let mut memories = memories.lock();

        let before = memories.len();
        let optimized = strategy.apply(&memories, Utc::now());
        *memories = optimized;
        debug!(
            user_id,
            strategy = %strategy,
            before,
            after = memories.len(),
            "Memories optimized"
        );
        Ok(memories.len())
    }

    pub fn set_strategy(&self, strategy: OptimizationStrategy) {
        *self.strategy.write() = strategy;
    }

    /// Set the strategy by name; unknown names select `importance`.
    pub fn set_strategy_by_name(&self, name: &str) -> OptimizationStrategy {
        let strategy = OptimizationStrategy::from_name(name);
        if strategy.name() != name.trim().to_ascii_lowercase() {
            debug!(requested = name, "Unknown optimization strategy; using importance");
        }
        self.set_strategy(strategy);
        strategy
    }

    pub fn strategy(&self) -> OptimizationStrategy {
        *self.strategy.read()
    }

    /// Number of memories stored for a user
    pub fn count(&self, user_id: &str) -> usize {
        let Some(memories) = self.user(user_id) else {
            return 0;
        };
        let count = memories.lock().len();
        count
    }

    /// Users that have ever stored a memory, sorted
    pub fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.users.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
