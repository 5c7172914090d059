//! Integration tests for the memory store and extractor

mod common;

use chrono::{Duration, Utc};
use common::mocks::{letter_embedding, MockTextModel};
use parley::memory::{AddOutcome, Memory, MemoryExtractor, MemoryStore, OptimizationStrategy};
use parley::types::AppError;
use rstest::rstest;
use std::sync::Arc;
use std::thread;

fn fact(user: &str, content: &str, vector: Vec<f32>, importance: f32) -> Memory {
    Memory::new(user, content)
        .with_vector(vector)
        .with_importance(importance)
}

// =============================================================================
// Merge on insert
// =============================================================================

#[test]
fn test_near_duplicate_scenario() {
    let store = MemoryStore::default();
    store
        .add(fact("u1", "likes Go", vec![1.0, 0.0], 0.5))
        .unwrap();
    let outcome = store
        .add(fact("u1", "enjoys Go", vec![0.99, 0.01], 0.8))
        .unwrap();
    assert!(matches!(outcome, AddOutcome::Merged(_)));

    let memories = store.get_memories("u1", 10);
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].importance, 0.8);
    assert!(memories[0].content.contains("likes Go"));
    assert!(memories[0].content.contains("enjoys Go"));
}

#[test]
fn test_distinct_facts_are_kept_apart() {
    let store = MemoryStore::default();
    store.add(fact("u1", "likes Go", vec![1.0, 0.0], 0.5)).unwrap();
    store.add(fact("u1", "has a cat", vec![0.0, 1.0], 0.5)).unwrap();
    store.add(fact("u1", "diagonal", vec![0.7, 0.7], 0.5)).unwrap();
    assert_eq!(store.count("u1"), 3);
}

#[test]
fn test_merge_picks_first_match() {
    let store = MemoryStore::default();
    let first = store.add(fact("u1", "first", vec![1.0, 0.0], 0.3)).unwrap();
    // Far enough from "first" to be stored separately
    store.add(fact("u1", "second", vec![0.8, 0.6], 0.3)).unwrap();

    // Within the threshold of both; merges into the earlier one
    let outcome = store.add(fact("u1", "third", vec![0.95, 0.31], 0.3)).unwrap();
    assert_eq!(outcome, AddOutcome::Merged(first.id().to_string()));
    assert_eq!(store.count("u1"), 2);
}

#[test]
fn test_users_are_isolated() {
    let store = MemoryStore::default();
    store.add(fact("u1", "likes Go", vec![1.0, 0.0], 0.5)).unwrap();
    store.add(fact("u2", "likes Go", vec![1.0, 0.0], 0.5)).unwrap();

    assert_eq!(store.count("u1"), 1);
    assert_eq!(store.count("u2"), 1);
    assert_eq!(store.user_ids(), vec!["u1", "u2"]);
}

#[test]
fn test_caller_timestamps_preserved() {
    let store = MemoryStore::default();
    let mut item = Memory::new("u1", "old fact");
    let then = Utc::now() - Duration::days(10);
    item.created_at = then;
    item.accessed_at = then;
    let id = item.id.clone();

    assert_eq!(store.add(item).unwrap(), AddOutcome::Inserted(id));
    let stored = &store.get_memories("u1", 0)[0];
    assert_eq!(stored.created_at, then);
    assert_eq!(stored.accessed_at, then);
}

#[test]
fn test_concurrent_duplicates_collapse() {
    let store = Arc::new(MemoryStore::default());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .add(fact("u1", &format!("fact {}", i), vec![1.0, 0.0, 0.0], i as f32 / 20.0))
                    .unwrap()
            })
        })
        .collect();
    let inserted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|o| matches!(o, AddOutcome::Inserted(_)))
        .count();

    assert_eq!(inserted, 1);
    let memories = store.get_memories("u1", 0);
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].importance, 0.75);
}

// =============================================================================
// Semantic search
// =============================================================================

#[test]
fn test_search_orders_by_similarity() {
    let store = MemoryStore::default();
    store.add(fact("u1", "v3", vec![0.0, 1.0], 0.5)).unwrap();
    store.add(fact("u1", "v1", vec![1.0, 0.0], 0.5)).unwrap();
    store.add(fact("u1", "v2", vec![0.6, 0.8], 0.5)).unwrap();

    let results = store.semantic_search("u1", &[1.0, 0.1], 2).unwrap();
    let contents: Vec<_> = results.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["v1", "v2"]);
}

#[test]
fn test_search_touches_every_memory() {
    let store = MemoryStore::default();
    store.add(fact("u1", "a", vec![1.0, 0.0], 0.5)).unwrap();
    store.add(fact("u1", "b", vec![0.0, 1.0], 0.5)).unwrap();

    let hits = store.semantic_search("u1", &[1.0, 0.0], 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].access_count, 1);

    let all = store.get_memories("u1", 0);
    assert!(all.iter().all(|m| m.access_count == 1));
}

#[test]
fn test_search_with_degraded_vectors_still_returns() {
    let store = MemoryStore::default();
    store.add(fact("u1", "no vector", vec![], 0.5)).unwrap();
    store.add(fact("u1", "zero", vec![0.0, 0.0], 0.5)).unwrap();
    store.add(fact("u1", "short", vec![1.0], 0.5)).unwrap();

    let results = store.semantic_search("u1", &[1.0, 0.0], 10).unwrap();
    // All score 0; stable order
    let contents: Vec<_> = results.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["no vector", "zero", "short"]);
}

#[test]
fn test_search_limits() {
    let store = MemoryStore::default();
    store.add(fact("u1", "a", vec![1.0, 0.0], 0.5)).unwrap();

    assert!(store.semantic_search("u1", &[1.0, 0.0], 0).unwrap().is_empty());
    assert_eq!(store.semantic_search("u1", &[1.0, 0.0], 50).unwrap().len(), 1);
    assert!(matches!(
        store.semantic_search("u1", &[f32::INFINITY, 0.0], 5),
        Err(AppError::InvalidInput(_))
    ));
}

#[test]
fn test_search_results_are_copies() {
    let store = MemoryStore::default();
    store.add(fact("u1", "original", vec![1.0, 0.0], 0.5)).unwrap();

    let mut results = store.semantic_search("u1", &[1.0, 0.0], 1).unwrap();
    results[0].content = "tampered".to_string();
    results[0].importance = 0.0;

    let stored = &store.get_memories("u1", 0)[0];
    assert_eq!(stored.content, "original");
    assert_eq!(stored.importance, 0.5);
}

// =============================================================================
// Strategies
// =============================================================================

#[test]
fn test_importance_strategy_order() {
    let store = MemoryStore::new(OptimizationStrategy::Importance);
    store.add(fact("u1", "low-ish", vec![1.0, 0.0], 0.3)).unwrap();
    store.add(fact("u1", "high", vec![0.0, 1.0], 0.9)).unwrap();
    store.add(fact("u1", "lowest", vec![], 0.1)).unwrap();

    let importances: Vec<f32> = store
        .get_memories("u1", 10)
        .iter()
        .map(|m| m.importance)
        .collect();
    assert_eq!(importances, vec![0.9, 0.3, 0.1]);
}

#[test]
fn test_time_decay_strategy_order() {
    let store = MemoryStore::new(OptimizationStrategy::TimeDecay);
    let mut stale = fact("u1", "stale", vec![], 0.9);
    stale.accessed_at = Utc::now() - Duration::days(60);
    store.add(stale).unwrap();
    store.add(fact("u1", "fresh", vec![], 0.4)).unwrap();

    let contents: Vec<_> = store
        .get_memories("u1", 0)
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["fresh", "stale"]);
}

#[test]
fn test_get_memories_does_not_shrink_storage() {
    let store = MemoryStore::new(OptimizationStrategy::Summarization);
    store
        .add(fact("u1", "a", vec![], 0.2).with_topics(["go"]))
        .unwrap();
    store
        .add(fact("u1", "b", vec![], 0.8).with_topics(["go"]))
        .unwrap();

    assert_eq!(store.get_memories("u1", 0).len(), 1);
    assert_eq!(store.count("u1"), 2);
    assert_eq!(store.get_memories("u1", 1)[0].content, "b");
}

#[test]
fn test_optimize_replaces_storage() {
    let store = MemoryStore::new(OptimizationStrategy::Summarization);
    store
        .add(fact("u1", "go beginner", vec![], 0.2).with_topics(["go"]))
        .unwrap();
    store
        .add(fact("u1", "go expert", vec![], 0.8).with_topics(["go", "work"]))
        .unwrap();
    store
        .add(fact("u1", "remote worker", vec![], 0.5).with_topics(["work"]))
        .unwrap();

    assert_eq!(store.optimize("u1").unwrap(), 1);
    assert_eq!(store.count("u1"), 1);

    store.set_strategy(OptimizationStrategy::Importance);
    assert_eq!(store.get_memories("u1", 0)[0].content, "go expert");
}

#[rstest]
#[case("importance", OptimizationStrategy::Importance)]
#[case("time_decay", OptimizationStrategy::TimeDecay)]
#[case("summarization", OptimizationStrategy::Summarization)]
#[case("SUMMARIZATION", OptimizationStrategy::Summarization)]
#[case("recency", OptimizationStrategy::Importance)]
#[case("", OptimizationStrategy::Importance)]
fn test_strategy_names(#[case] name: &str, #[case] expected: OptimizationStrategy) {
    let store = MemoryStore::default();
    assert_eq!(store.set_strategy_by_name(name), expected);
    assert_eq!(store.strategy(), expected);
}

// =============================================================================
// Extractor
// =============================================================================

const EXTRACTION_REPLY: &str = r#"Here is what I found:
[
  {"content": "Lives in Lisbon", "topics": ["location"], "importance": 0.7},
  {"content": "   ", "topics": ["noise"]},
  {"content": "Prefers short answers", "topics": ["style", " "]}
]"#;

#[tokio::test]
async fn test_extract_embeds_and_defaults() {
    let model = MockTextModel::new(EXTRACTION_REPLY);
    let extractor = MemoryExtractor::new(model.clone().shared());

    let memories = extractor
        .extract("u1", "user: I live in Lisbon, keep it short")
        .await
        .unwrap();

    assert_eq!(memories.len(), 2);
    assert_eq!(memories[0].content, "Lives in Lisbon");
    assert_eq!(memories[0].importance, 0.7);
    assert_eq!(memories[0].vector, letter_embedding("Lives in Lisbon"));
    assert_eq!(memories[1].importance, 0.5);
    assert_eq!(memories[1].topics.len(), 1);
    assert!(memories.iter().all(|m| m.user_id == "u1"));
    assert_eq!(model.embed_calls(), 2);
}

#[tokio::test]
async fn test_extract_survives_embedding_failure() {
    let model = MockTextModel::new(EXTRACTION_REPLY).with_failing_embeddings();
    let extractor = MemoryExtractor::new(model.shared());

    let memories = extractor.extract("u1", "user: hi").await.unwrap();
    assert_eq!(memories.len(), 2);
    assert!(memories.iter().all(|m| m.vector.is_empty()));
}

#[tokio::test]
async fn test_remember_drops_non_finite_embeddings() {
    let model = MockTextModel::new(EXTRACTION_REPLY).with_malformed_embeddings();
    let extractor = MemoryExtractor::new(model.clone().shared());
    let store = MemoryStore::default();

    let outcomes = extractor.remember(&store, "u1", "user: hi").await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(model.embed_calls(), 2);
    assert_eq!(store.count("u1"), 2);
    assert!(store.get_memories("u1", 0).iter().all(|m| m.vector.is_empty()));

    assert!(matches!(
        extractor.recall(&store, "u1", "anything", 5).await,
        Err(AppError::LLM(_))
    ));
}

#[tokio::test]
async fn test_extract_propagates_model_failure() {
    let extractor = MemoryExtractor::new(MockTextModel::failing().shared());
    assert!(matches!(
        extractor.extract("u1", "user: hi").await,
        Err(AppError::LLM(_))
    ));
    assert!(matches!(
        extractor.extract("", "user: hi").await,
        Err(AppError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_remember_then_recall() {
    let model = MockTextModel::new(EXTRACTION_REPLY);
    let extractor = MemoryExtractor::new(model.shared());
    let store = MemoryStore::default();

    let outcomes = extractor
        .remember(&store, "u1", "user: I live in Lisbon")
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(store.count("u1"), 2);

    // Remembering the same conversation again merges instead of duplicating
    let again = extractor
        .remember(&store, "u1", "user: I live in Lisbon")
        .await
        .unwrap();
    assert!(again.iter().all(|o| matches!(o, AddOutcome::Merged(_))));
    assert_eq!(store.count("u1"), 2);

    let recalled = extractor
        .recall(&store, "u1", "Lisbon lives", 1)
        .await
        .unwrap();
    assert!(recalled[0].content.starts_with("Lives in Lisbon"));
}

#[tokio::test]
async fn test_recall_without_embeddings_uses_strategy() {
    let model = MockTextModel::new("[]").without_embeddings();
    let extractor = MemoryExtractor::new(model.clone().shared());
    let store = MemoryStore::default();
    store.add(fact("u1", "minor", vec![], 0.2)).unwrap();
    store.add(fact("u1", "major", vec![], 0.9)).unwrap();

    let recalled = extractor.recall(&store, "u1", "anything", 5).await.unwrap();
    assert_eq!(recalled[0].content, "major");
    assert_eq!(model.embed_calls(), 0);

    let disabled = MemoryExtractor::new(MockTextModel::new("[]").shared()).with_semantic_search(false);
    assert_eq!(disabled.recall(&store, "u1", "x", 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_recall_embedding_failure_is_llm_error() {
    let model = MockTextModel::new("[]").with_failing_embeddings();
    let extractor = MemoryExtractor::new(model.shared());
    let store = MemoryStore::default();

    assert!(matches!(
        extractor.recall(&store, "u1", "anything", 5).await,
        Err(AppError::LLM(_))
    ));
}
