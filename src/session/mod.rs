//! Concurrent session store
//!
//! [`SessionStore`] owns every conversation the service is tracking:
//!
//! - **History**: a rolling window of at most `max_history` turns per session
//! - **Summary**: a best-effort digest of turns that fell out of the window,
//!   produced in the background by a [`TextModel`]
//! - **State**: a versioned key/value map; each `update_state` call bumps the
//!   version by exactly one
//! - **Metadata**: an unversioned key/value map for service bookkeeping
//!
//! # Locking
//!
//! One `RwLock` guards the id → session map and each session carries its own
//! `RwLock`. Creation uses double-checked locking: a shared-lock lookup first,
//! then an exclusive lock that re-checks before inserting a fully built
//! session. Mutations of different sessions never contend; mutations of one
//! session are totally ordered by its lock.
//!
//! Every read API returns an owned copy, never a reference into the store.
//!
//! # Example
//!
//! ```ignore
//! use parley::session::SessionStore;
//! use parley::types::Turn;
//!
//! let store = SessionStore::new(config.session.clone()).with_summary_model(model);
//! store.add_message("s1", Turn::user("hi"))?;
//! let context = store.get_history("s1")?; // summary (if any) + live turns
//! ```

pub mod summarizer;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::llm::TextModel;
use crate::types::{AppError, Result, Turn};
use crate::utils::SessionConfig;
use summarizer::{SummaryCounters, SummaryJob, SummaryQueue, SummarySource};

pub use summarizer::build_summary_prompt;

/// Prefix of the synthetic system turn carrying the summary
pub const SUMMARY_PREFIX: &str = "[Conversation summary]\n";

// ============================================================================
// Snapshot Types
// ============================================================================

/// Versioned structured state of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub data: HashMap<String, Value>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            data: HashMap::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Model most recently associated with the session (advisory)
    pub model_hint: String,
    pub history: Vec<Turn>,
    pub summary: String,
    pub state: SessionState,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store-wide counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Sessions currently held
    pub active_sessions: usize,
    /// Sessions ever constructed by this store
    pub sessions_created: u64,
    /// Summarization jobs accepted by the queue
    pub summaries_scheduled: u64,
    /// Jobs that produced a new summary
    pub summaries_applied: u64,
    /// Jobs that failed, timed out or returned nothing
    pub summaries_failed: u64,
    /// Jobs rejected because the queue was full, closed or unavailable
    pub summaries_dropped: u64,
    /// Jobs queued or running right now
    pub pending_summaries: usize,
}

// ============================================================================
// Session Entry
// ============================================================================

struct SessionInner {
    model_hint: String,
    history: VecDeque<Turn>,
    summary: String,
    state: SessionState,
    metadata: HashMap<String, Value>,
    updated_at: DateTime<Utc>,
    /// Evicted turns not yet folded into `summary`
    unsummarized: VecDeque<Turn>,
    summary_in_flight: bool,
}

/// A session as held by the store
pub(crate) struct SessionEntry {
    id: String,
    created_at: DateTime<Utc>,
    unsummarized_cap: usize,
    inner: RwLock<SessionInner>,
}

impl SessionEntry {
    fn new(id: &str, model_hint: &str, config: &SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            created_at: now,
            unsummarized_cap: config.max_history.max(config.summary_prompt_turns).max(1),
            inner: RwLock::new(SessionInner {
                model_hint: model_hint.to_string(),
                history: VecDeque::with_capacity(config.max_history.saturating_add(1)),
                summary: String::new(),
                state: SessionState::new(),
                metadata: HashMap::new(),
                updated_at: now,
                unsummarized: VecDeque::new(),
                summary_in_flight: false,
            }),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn note_model_hint(&self, model_hint: &str) {
        if model_hint.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        if inner.model_hint != model_hint {
            inner.model_hint = model_hint.to_string();
        }
    }

    fn snapshot(&self) -> Session {
        let inner = self.inner.read();
        Session {
            id: self.id.clone(),
            model_hint: inner.model_hint.clone(),
            history: inner.history.iter().cloned().collect(),
            summary: inner.summary.clone(),
            state: inner.state.clone(),
            metadata: inner.metadata.clone(),
            created_at: self.created_at,
            updated_at: inner.updated_at,
        }
    }

    pub(crate) fn apply_summary(&self, summary: String) {
        self.inner.write().summary = summary;
    }

    pub(crate) fn finish_summary(&self) {
        self.inner.write().summary_in_flight = false;
    }

    /// Put turns back in front of the buffer after an unsuccessful job.
    pub(crate) fn restore_unsummarized(&self, turns: Vec<Turn>) {
        if turns.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        for turn in turns.into_iter().rev() {
            inner.unsummarized.push_front(turn);
        }
        while inner.unsummarized.len() > self.unsummarized_cap {
            inner.unsummarized.pop_front();
        }
    }
}

impl SessionInner {
    fn buffer_evicted(&mut self, turn: Turn, cap: usize) {
        self.unsummarized.push_back(turn);
        while self.unsummarized.len() > cap {
            self.unsummarized.pop_front();
        }
    }
}

// ============================================================================
// Session Store
// ============================================================================

/// Concurrency-safe registry of sessions
///
/// Construct one per application (or per test) and share it behind an `Arc`.
/// Background summarization starts lazily on the current Tokio runtime the
/// first time a session needs it; without a summary model the store is a
/// plain synchronous structure usable from any thread.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
    config: SessionConfig,
    summary_threshold: AtomicUsize,
    auto_summary: AtomicBool,
    summary_model: RwLock<Option<Arc<dyn TextModel>>>,
    queue: RwLock<Option<SummaryQueue>>,
    counters: Arc<SummaryCounters>,
    sessions_created: AtomicU64,
    cancel: CancellationToken,
}

impl SessionStore {
    /// Create a store without a summary model
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            summary_threshold: AtomicUsize::new(config.summary_threshold),
            auto_summary: AtomicBool::new(config.auto_summary),
            config,
            summary_model: RwLock::new(None),
            queue: RwLock::new(None),
            counters: Arc::new(SummaryCounters::default()),
            sessions_created: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a store with default configuration
    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::default())
    }

    /// Attach the model used for background summarization
    pub fn with_summary_model(self, model: Arc<dyn TextModel>) -> Self {
        self.set_summary_model(Some(model));
        self
    }

    /// Tie background work to an outer cancellation token.
    ///
    /// Cancelling `token` (or dropping the store) stops the summary queue;
    /// summaries that have not been written by then are simply never written.
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancel.cancel();
        self.cancel = token.child_token();
        *self.queue.get_mut() = None;
        self
    }

    /// Get the store configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ============== Lookup & Creation ==============

    fn validate_id(id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "session id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn entry(&self, id: &str) -> Result<Arc<SessionEntry>> {
        Self::validate_id(id)?;
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))
    }

    fn entry_or_create(&self, id: &str, model_hint: &str) -> Result<Arc<SessionEntry>> {
        Self::validate_id(id)?;

        // Fast path: shared lock only
        let existing = self.sessions.read().get(id).cloned();
        if let Some(entry) = existing {
            entry.note_model_hint(model_hint);
            return Ok(entry);
        }

        let mut sessions = self.sessions.write();
        // Another caller may have created it while we waited for the write lock
        let raced = sessions.get(id).cloned();
        if let Some(entry) = raced {
            drop(sessions);
            entry.note_model_hint(model_hint);
            return Ok(entry);
        }

        let entry = Arc::new(SessionEntry::new(id, model_hint, &self.config));
        sessions.insert(id.to_string(), Arc::clone(&entry));
        drop(sessions);

        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = id, model_hint, "Session created");
        Ok(entry)
    }

    /// Return the session with `id`, creating it if it does not exist
    pub fn get_or_create(&self, id: &str, model_hint: &str) -> Result<Session> {
        Ok(self.entry_or_create(id, model_hint)?.snapshot())
    }

    /// Return a copy of an existing session
    pub fn get_session(&self, id: &str) -> Result<Session> {
        Ok(self.entry(id)?.snapshot())
    }

    /// Remove a session. Removing an unknown id is not an error.
    pub fn clear(&self, id: &str) -> Result<()> {
        Self::validate_id(id)?;
        if self.sessions.write().remove(id).is_some() {
            debug!(session_id = id, "Session cleared");
        }
        Ok(())
    }

    /// Number of sessions currently held
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Ids of all sessions, sorted ascending
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ============== History ==============

    /// Append a turn, creating the session if needed.
    ///
    /// Turns pushed out of the window are buffered for summarization. Whenever
    /// the history grows past the summary threshold and no job is in flight, a
    /// background job is queued over the buffered turns, or over the live
    /// window when nothing has been evicted yet. This call never waits for the
    /// job and never reports its failure.
    pub fn add_message(&self, id: &str, turn: Turn) -> Result<()> {
        let entry = self.entry_or_create(id, "")?;
        let max_history = self.config.max_history.max(1);
        let model = self.active_summary_model();

        let job = {
            let mut inner = entry.inner.write();
            inner.history.push_back(turn);
            inner.updated_at = Utc::now();

            let grown_to = inner.history.len();
            while inner.history.len() > max_history {
                let Some(evicted) = inner.history.pop_front() else {
                    break;
                };
                if model.is_some() {
                    inner.buffer_evicted(evicted, entry.unsummarized_cap);
                }
            }

            match model {
                Some(model)
                    if !inner.summary_in_flight
                        && grown_to > self.summary_threshold.load(Ordering::Relaxed) =>
                {
                    // Fold evicted turns when there are any, otherwise digest the live window
                    let (turns, source): (Vec<Turn>, _) = if inner.unsummarized.is_empty() {
                        (inner.history.iter().cloned().collect(), SummarySource::LiveHistory)
                    } else {
                        (inner.unsummarized.drain(..).collect(), SummarySource::Evicted)
                    };
                    inner.summary_in_flight = true;
                    Some(SummaryJob::new(
                        Arc::clone(&entry),
                        model,
                        inner.summary.clone(),
                        turns,
                        source,
                        Arc::clone(&self.counters),
                    ))
                }
                _ => None,
            }
        };

        if let Some(job) = job {
            self.enqueue(job);
        }
        Ok(())
    }

    /// History as it should be fed to a model: the summary (if any) as a
    /// leading `system` turn, followed by the live turns.
    pub fn get_history(&self, id: &str) -> Result<Vec<Turn>> {
        let entry = self.entry(id)?;
        let inner = entry.inner.read();

        let mut turns = Vec::with_capacity(inner.history.len() + 1);
        if !inner.summary.is_empty() {
            turns.push(Turn::system(format!("{}{}", SUMMARY_PREFIX, inner.summary)));
        }
        turns.extend(inner.history.iter().cloned());
        Ok(turns)
    }

    // ============== State & Metadata ==============

    /// Merge `updates` into the session state and bump its version once.
    pub fn update_state(&self, id: &str, updates: HashMap<String, Value>) -> Result<u64> {
        let entry = self.entry_or_create(id, "")?;
        let mut inner = entry.inner.write();

        inner.state.data.extend(updates);
        inner.state.version += 1;
        let now = Utc::now();
        inner.state.updated_at = now;
        inner.updated_at = now;

        Ok(inner.state.version)
    }

    /// Copy of the session state
    pub fn get_state(&self, id: &str) -> Result<SessionState> {
        Ok(self.entry(id)?.inner.read().state.clone())
    }

    /// Merge `metadata` into the session metadata (not versioned)
    pub fn set_metadata(&self, id: &str, metadata: HashMap<String, Value>) -> Result<()> {
        let entry = self.entry_or_create(id, "")?;
        let mut inner = entry.inner.write();
        inner.metadata.extend(metadata);
        inner.updated_at = Utc::now();
        Ok(())
    }

    /// Copy of the session metadata
    pub fn get_metadata(&self, id: &str) -> Result<HashMap<String, Value>> {
        Ok(self.entry(id)?.inner.read().metadata.clone())
    }

    // ============== Summarization Controls ==============

    /// Replace (or remove) the summary model
    pub fn set_summary_model(&self, model: Option<Arc<dyn TextModel>>) {
        if let Some(model) = &model {
            debug!(model = model.model_name(), "Summary model configured");
        }
        *self.summary_model.write() = model;
    }

    /// Change the history length above which summarization is triggered
    pub fn set_summary_threshold(&self, threshold: usize) {
        self.summary_threshold.store(threshold, Ordering::Relaxed);
    }

    /// Turn automatic summarization on or off
    pub fn enable_auto_summary(&self, enable: bool) {
        self.auto_summary.store(enable, Ordering::Relaxed);
    }

    /// Whether new messages can currently trigger summarization
    pub fn is_auto_summary_active(&self) -> bool {
        self.active_summary_model().is_some()
    }

    fn active_summary_model(&self) -> Option<Arc<dyn TextModel>> {
        if !self.auto_summary.load(Ordering::Relaxed) || self.cancel.is_cancelled() {
            return None;
        }
        self.summary_model.read().clone()
    }

    fn enqueue(&self, job: SummaryJob) {
        {
            let queue = self.queue.read();
            if let Some(queue) = queue.as_ref() {
                self.record_enqueue(queue.try_enqueue(job));
                return;
            }
        }

        let mut queue = self.queue.write();
        if queue.is_none() {
            match SummaryQueue::spawn(&self.config, self.cancel.clone()) {
                Ok(started) => *queue = Some(started),
                Err(e) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Cannot start summary queue; skipping summarization");
                    return;
                }
            }
        }
        if let Some(queue) = queue.as_ref() {
            self.record_enqueue(queue.try_enqueue(job));
        }
    }

    fn record_enqueue(&self, accepted: bool) {
        let counter = if accepted {
            &self.counters.scheduled
        } else {
            &self.counters.dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop background summarization. Pending summaries are discarded.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Snapshot of the store counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active_sessions: self.count(),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            summaries_scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            summaries_applied: self.counters.applied.load(Ordering::Relaxed),
            summaries_failed: self.counters.failed.load(Ordering::Relaxed),
            summaries_dropped: self.counters.dropped.load(Ordering::Relaxed),
            pending_summaries: self.counters.pending.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
