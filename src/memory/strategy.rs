//! Read-time optimization strategies for a user's memories

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Memory;
use crate::utils::similarity::decay_score;

/// How a user's memories are ranked (and possibly reduced) when read.
///
/// Parsing never fails: unknown names fall back to [`OptimizationStrategy::Importance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OptimizationStrategy {
    /// Most important first
    #[default]
    Importance,
    /// Importance decayed by time since last access
    TimeDecay,
    /// Best item per topic
    Summarization,
}

impl OptimizationStrategy {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "time_decay" => Self::TimeDecay,
            "summarization" => Self::Summarization,
            _ => Self::Importance,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Importance => "importance",
            Self::TimeDecay => "time_decay",
            Self::Summarization => "summarization",
        }
    }

    /// Apply the strategy to a snapshot. The input order is the tie-breaker.
    pub fn apply(&self, memories: &[Memory], now: DateTime<Utc>) -> Vec<Memory> {
        match self {
            Self::Importance => by_importance(memories),
            Self::TimeDecay => by_time_decay(memories, now),
            Self::Summarization => by_topic(memories),
        }
    }
}

impl From<String> for OptimizationStrategy {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<OptimizationStrategy> for String {
    fn from(strategy: OptimizationStrategy) -> Self {
        strategy.name().to_string()
    }
}

impl fmt::Display for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn by_importance(memories: &[Memory]) -> Vec<Memory> {
    let mut sorted = memories.to_vec();
    sorted.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    sorted
}

fn by_time_decay(memories: &[Memory], now: DateTime<Utc>) -> Vec<Memory> {
    let mut scored: Vec<(f64, &Memory)> = memories
        .iter()
        .map(|m| {
            let hours = (now - m.accessed_at).num_milliseconds() as f64 / 3_600_000.0;
            (decay_score(m.importance, hours), m)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, m)| m.clone()).collect()
}

fn by_topic(memories: &[Memory]) -> Vec<Memory> {
    // topic -> index of the best memory seen so far
    let mut best: BTreeMap<&str, usize> = BTreeMap::new();
    let mut untagged = Vec::new();

    for (idx, memory) in memories.iter().enumerate() {
        if memory.topics.is_empty() {
            untagged.push(idx);
            continue;
        }
        for topic in &memory.topics {
            best.entry(topic.as_str())
                .and_modify(|current| {
                    if memory.importance > memories[*current].importance {
                        *current = idx;
                    }
                })
                .or_insert(idx);
        }
    }

    let mut seen = HashSet::new();
    let mut winners: Vec<usize> = best
        .into_values()
        .chain(untagged)
        .filter(|idx| seen.insert(*idx))
        .collect();
    // Keep input order among equal importances
    winners.sort_by(|a, b| {
        memories[*b]
            .importance
            .total_cmp(&memories[*a].importance)
            .then(a.cmp(b))
    });

    winners.into_iter().map(|idx| memories[idx].clone()).collect()
}
