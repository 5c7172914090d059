//! Background summarization queue
//!
//! Sessions hand their evicted turns (or, before anything has been evicted,
//! a copy of their live history) to this queue instead of spawning an
//! unbounded task per message:
//!
//! - a bounded `mpsc` channel absorbs bursts; a full channel drops the job
//! - one dispatcher task pulls jobs and runs each under a `Semaphore` permit,
//!   so at most `summary_workers` model calls are in flight
//! - every call runs under `tokio::time::timeout` and the store's
//!   `CancellationToken`
//!
//! A job over evicted turns that does not complete successfully (failure,
//! timeout, cancellation, or dropped before it ran) gives its turns back to
//! the session so the next threshold crossing retries them. Live-history jobs
//! give nothing back: those turns are still in the window. The summary is only ever written after a
//! full, non-empty model reply.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SessionEntry;
use crate::llm::TextModel;
use crate::types::{AppError, Result, Turn};
use crate::utils::SessionConfig;

/// Header of every summarization prompt
const SUMMARY_INSTRUCTIONS: &str = "Summarize the conversation below into a concise digest. \
Keep the key information: what the user wants, decisions that were made, and open questions.";

/// Counters shared between the store and its background jobs
#[derive(Debug, Default)]
pub(crate) struct SummaryCounters {
    pub(crate) scheduled: AtomicU64,
    pub(crate) applied: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) pending: AtomicUsize,
}

/// Where a job's turns came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SummarySource {
    /// Drained from the session's buffer of evicted turns
    Evicted,
    /// Copied from the live window
    LiveHistory,
}

/// One summarization request for one session.
pub(crate) struct SummaryJob {
    session: Arc<SessionEntry>,
    model: Arc<dyn TextModel>,
    previous_summary: String,
    turns: Vec<Turn>,
    source: SummarySource,
    counters: Arc<SummaryCounters>,
    completed: bool,
}

impl SummaryJob {
    pub(crate) fn new(
        session: Arc<SessionEntry>,
        model: Arc<dyn TextModel>,
        previous_summary: String,
        turns: Vec<Turn>,
        source: SummarySource,
        counters: Arc<SummaryCounters>,
    ) -> Self {
        counters.pending.fetch_add(1, Ordering::Relaxed);
        Self {
            session,
            model,
            previous_summary,
            turns,
            source,
            counters,
            completed: false,
        }
    }

    async fn run(mut self, timeout: Duration, prompt_turns: usize, cancel: CancellationToken) {
        let prompt = build_summary_prompt(&self.previous_summary, &self.turns, prompt_turns);
        let request = [Turn::user(prompt)];

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %self.session.id(), "Summarization cancelled");
                return;
            }
            outcome = tokio::time::timeout(timeout, self.model.chat(&request)) => outcome,
        };

        match outcome {
            Ok(Ok(reply)) => {
                let summary = reply.trim();
                if summary.is_empty() {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        session_id = %self.session.id(),
                        model = self.model.model_name(),
                        "Summarizer returned an empty reply; keeping previous summary"
                    );
                    return;
                }

                self.session.apply_summary(summary.to_string());
                self.completed = true;
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                info!(
                    session_id = %self.session.id(),
                    turns = self.turns.len(),
                    "Session summary updated"
                );
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %self.session.id(),
                    model = self.model.model_name(),
                    error = %e,
                    "Summarization failed; summary left unchanged"
                );
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    session_id = %self.session.id(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Summarization timed out; summary left unchanged"
                );
            }
        }
    }
}

impl Drop for SummaryJob {
    fn drop(&mut self) {
        if !self.completed && self.source == SummarySource::Evicted {
            self.session.restore_unsummarized(std::mem::take(&mut self.turns));
        }
        self.session.finish_summary();
        self.counters.pending.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Handle to the dispatcher task.
pub(crate) struct SummaryQueue {
    tx: mpsc::Sender<SummaryJob>,
}

impl SummaryQueue {
    /// Start the dispatcher on the current Tokio runtime.
    pub(crate) fn spawn(config: &SessionConfig, cancel: CancellationToken) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            AppError::Internal("summarization requires a running Tokio runtime".to_string())
        })?;

        let (tx, rx) = mpsc::channel(config.summary_queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(config.summary_workers.max(1)));

        handle.spawn(dispatch(
            rx,
            semaphore,
            cancel,
            config.summary_timeout(),
            config.summary_prompt_turns.max(1),
        ));

        debug!(
            workers = config.summary_workers,
            capacity = config.summary_queue_capacity,
            "Summary queue started"
        );
        Ok(Self { tx })
    }

    /// Enqueue without waiting. Returns false when the job was dropped.
    pub(crate) fn try_enqueue(&self, job: SummaryJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(session_id = %job.session.id(), "Summary queue full; dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                debug!(session_id = %job.session.id(), "Summary queue closed; dropping job");
                false
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<SummaryJob>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    timeout: Duration,
    prompt_turns: usize,
) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            job.run(timeout, prompt_turns, cancel).await;
        });
    }

    // Give queued turns back to their sessions
    rx.close();
    while rx.try_recv().is_ok() {}
    debug!("Summary dispatcher stopped");
}

/// Build the prompt sent to the summarizer.
///
/// Only the most recent `max_turns` turns are included; the previous summary
/// (if any) is carried along so the new summary covers the whole evicted span.
pub fn build_summary_prompt(previous_summary: &str, turns: &[Turn], max_turns: usize) -> String {
    let mut prompt = String::from(SUMMARY_INSTRUCTIONS);
    prompt.push_str("\n\n");

    let previous = previous_summary.trim();
    if !previous.is_empty() {
        prompt.push_str("Summary so far:\n");
        prompt.push_str(previous);
        prompt.push_str("\n\n");
    }

    let skipped = turns.len().saturating_sub(max_turns);
    prompt.push_str("Conversation:\n");
    if skipped > 0 {
        prompt.push_str(&format!("({} earlier turns omitted)\n", skipped));
    }
    for turn in &turns[skipped..] {
        prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }

    prompt.push_str("\nRequirements:\n");
    prompt.push_str("1. Be brief and factual\n");
    prompt.push_str("2. Fold the summary so far and the new turns into one digest\n");
    prompt.push_str("3. Stay under 200 words");
    prompt
}
