//! Memory engine.
//!
//! Ties the [`ConversationBuffer`], [`Summarizer`] and [`MemoryStore`]
//! together and runs summarization cycles with clear-after-success ordering:
//!
//! 1. copy the oldest window of turns (the buffer keeps them),
//! 2. summarize through the memory-role router,
//! 3. append the entry to the store,
//! 4. only then remove exactly the summarized turns.
//!
//! A failure at step 2 or 3 leaves the buffer untouched.  Cycles never
//! overlap; chat appends may continue while one is in flight.

use std::sync::Arc;

use chrono::Utc;
use companion_router::RoleStatus;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::ConversationBuffer;
use crate::error::{MemoryError, Result};
use crate::store::{MemoryEntry, MemoryStore};
use crate::summarizer::Summarizer;
use crate::turn::ConversationTurn;

/// When and how much to summarize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPolicy {
    /// Summarize once the buffer size (in the buffer's unit) reaches this.
    pub threshold: usize,
    /// Summarize only the oldest `window` turns per cycle.  `None`
    /// summarizes and clears the whole buffer.
    pub window: Option<usize>,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            threshold: 300,
            window: None,
        }
    }
}

/// Result of a summarization cycle that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// The buffer is below the threshold.
    NotNeeded,
    /// Nothing to summarize.
    Empty,
    /// An entry was stored and its turns removed from the buffer.
    Stored {
        entry: MemoryEntry,
        summarized_turns: usize,
        remaining_turns: usize,
    },
}

/// Diagnostic view over router health and memory sizes.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub roles: Vec<RoleStatus>,
    pub buffer_turns: usize,
    pub buffer_chars: usize,
    pub memory_entries: usize,
}

/// Owns the memory pipeline for one conversation stream.
#[derive(Debug)]
pub struct MemoryEngine {
    buffer: Arc<ConversationBuffer>,
    store: Arc<MemoryStore>,
    summarizer: Summarizer,
    policy: MemoryPolicy,
    cycle: Mutex<()>,
}

impl MemoryEngine {
    pub fn new(
        buffer: Arc<ConversationBuffer>,
        store: Arc<MemoryStore>,
        summarizer: Summarizer,
        policy: MemoryPolicy,
    ) -> Self {
        Self {
            buffer,
            store,
            summarizer,
            policy,
            cycle: Mutex::new(()),
        }
    }

    pub fn buffer(&self) -> &Arc<ConversationBuffer> {
        &self.buffer
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn policy(&self) -> MemoryPolicy {
        self.policy
    }

    /// Add a turn to the buffer.  Blank turns are rejected.
    pub async fn record_turn(&self, turn: ConversationTurn) -> Result<()> {
        if turn.text.trim().is_empty() {
            return Err(MemoryError::InvalidTurn("turn text is empty".into()));
        }
        self.buffer.append(turn).await
    }

    /// Whether the buffer has reached the summarization threshold.
    pub async fn needs_summary(&self) -> bool {
        self.buffer.size().await >= self.policy.threshold
    }

    /// Run a cycle if the threshold is reached.
    pub async fn maybe_summarize(&self) -> Result<SummaryOutcome> {
        if !self.needs_summary().await {
            return Ok(SummaryOutcome::NotNeeded);
        }
        self.summarize_now().await
    }

    /// Run a cycle regardless of the threshold.
    ///
    /// A [`MemoryError::Summarize`] error means no provider produced a
    /// summary; the buffer and store are unchanged.
    pub async fn summarize_now(&self) -> Result<SummaryOutcome> {
        let _cycle = self.cycle.lock().await;

        let ticket = self.buffer.snapshot_window(self.policy.window).await;
        if ticket.is_empty() {
            debug!("nothing to summarize");
            return Ok(SummaryOutcome::Empty);
        }

        let entry = match self.summarizer.summarize(ticket.turns()).await {
            Ok(entry) => entry,
            Err(failure) => {
                warn!(
                    turns = ticket.len(),
                    error = %failure,
                    "summarization deferred, conversation buffer kept"
                );
                return Err(failure.into());
            }
        };

        self.store.append(&entry).await?;

        let summarized_turns = ticket.len();
        let remaining_turns = self.buffer.commit_window(ticket).await?;

        info!(
            summarized_turns,
            remaining_turns,
            importance = entry.importance,
            "memory entry stored"
        );

        Ok(SummaryOutcome::Stored {
            entry,
            summarized_turns,
            remaining_turns,
        })
    }

    /// Run cycles until the buffer is empty and return how many entries were
    /// stored.  Used to close out a day when a sliding window would otherwise
    /// leave older turns behind.  Stops at the first failure, keeping every
    /// turn not yet summarized.
    pub async fn summarize_all(&self) -> Result<usize> {
        let mut stored = 0;
        loop {
            match self.summarize_now().await? {
                SummaryOutcome::Stored {
                    remaining_turns, ..
                } => {
                    stored += 1;
                    if remaining_turns == 0 {
                        return Ok(stored);
                    }
                }
                SummaryOutcome::Empty | SummaryOutcome::NotNeeded => return Ok(stored),
            }
        }
    }

    /// Router health plus buffer and store sizes.
    pub async fn diagnostics(&self) -> Result<DiagnosticReport> {
        Ok(DiagnosticReport {
            roles: self.summarizer.router().context().status(Utc::now()),
            buffer_turns: self.buffer.len().await,
            buffer_chars: self.buffer.char_count().await,
            memory_entries: self.store.count()?,
        })
    }
}
