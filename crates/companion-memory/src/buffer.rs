//! Conversation buffer.
//!
//! Holds the turns of the current day in memory and mirrors them to an
//! append-only daily log (one JSON object per line).  Every operation takes
//! the same async mutex, so appends, drains and window commits are mutually
//! exclusive and a drain always sees a consistent snapshot.
//!
//! Summarization uses a two-phase protocol: [`snapshot_window`] copies the
//! oldest turns without removing them, and [`commit_window`] removes exactly
//! that prefix once the summary has been stored.  Turns appended in between
//! survive the commit.
//!
//! [`snapshot_window`]: ConversationBuffer::snapshot_window
//! [`commit_window`]: ConversationBuffer::commit_window

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{MemoryError, Result};
use crate::fsio;
use crate::turn::ConversationTurn;

/// Unit in which buffer size is measured against the summarization
/// threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    #[default]
    Turns,
    Chars,
}

#[derive(Debug)]
struct BufferState {
    turns: VecDeque<ConversationTurn>,
    chars: usize,
    /// Bumped whenever turns are removed from the front.
    generation: u64,
    day: NaiveDate,
}

impl BufferState {
    fn push(&mut self, turn: ConversationTurn) {
        self.chars += turn.char_len();
        self.turns.push_back(turn);
    }

    fn remove_front(&mut self, count: usize) -> Vec<ConversationTurn> {
        let removed: Vec<_> = self.turns.drain(..count.min(self.turns.len())).collect();
        self.chars -= removed.iter().map(ConversationTurn::char_len).sum::<usize>();
        self.generation += 1;
        removed
    }
}

/// A copy of the oldest turns, taken for summarization.
#[derive(Debug, Clone)]
pub struct WindowTicket {
    turns: Vec<ConversationTurn>,
    generation: u64,
}

impl WindowTicket {
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Bounded in-memory conversation log with an on-disk mirror.
#[derive(Debug)]
pub struct ConversationBuffer {
    state: Mutex<BufferState>,
    log_path: Option<PathBuf>,
    unit: SizeUnit,
}

impl ConversationBuffer {
    /// A buffer without a daily log.
    pub fn in_memory(unit: SizeUnit) -> Self {
        Self {
            state: Mutex::new(BufferState {
                turns: VecDeque::new(),
                chars: 0,
                generation: 0,
                day: Local::now().date_naive(),
            }),
            log_path: None,
            unit,
        }
    }

    /// Open the daily log at `path`, replaying any turns it already holds.
    /// Unreadable lines are skipped with a warning.
    pub fn open(path: impl Into<PathBuf>, unit: SizeUnit) -> Result<Self> {
        let path = path.into();
        fsio::ensure_parent(&path)?;
        let text = fsio::read_or_empty(&path)?;

        let mut state = BufferState {
            turns: VecDeque::new(),
            chars: 0,
            generation: 0,
            day: Local::now().date_naive(),
        };

        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConversationTurn>(line) {
                Ok(turn) => state.push(turn),
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping unreadable daily log line"
                ),
            }
        }

        if let Some(last) = state.turns.back() {
            state.day = last.timestamp.with_timezone(&Local).date_naive();
        }

        info!(
            path = %path.display(),
            turns = state.turns.len(),
            day = %state.day,
            "daily log opened"
        );

        Ok(Self {
            state: Mutex::new(state),
            log_path: Some(path),
            unit,
        })
    }

    pub fn unit(&self) -> SizeUnit {
        self.unit
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Append a turn.
    ///
    /// The turn is always kept in memory.  If mirroring it to the daily log
    /// fails the error is returned, but the in-memory buffer still holds it.
    #[instrument(skip(self, turn), fields(speaker = %turn.speaker))]
    pub async fn append(&self, turn: ConversationTurn) -> Result<()> {
        let line = self.log_path.as_ref().map(|_| serde_json::to_string(&turn)).transpose()?;

        let mut state = self.state.lock().await;
        state.push(turn);

        if let (Some(path), Some(mut line)) = (&self.log_path, line) {
            line.push('\n');
            let path = path.clone();
            fsio::blocking(move || fsio::append_durable(&path, line.as_bytes())).await?;
        }
        Ok(())
    }

    /// Size in the configured unit.
    pub async fn size(&self) -> usize {
        let state = self.state.lock().await;
        match self.unit {
            SizeUnit::Turns => state.turns.len(),
            SizeUnit::Chars => state.chars,
        }
    }

    /// Number of turns.
    pub async fn len(&self) -> usize {
        self.state.lock().await.turns.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.turns.is_empty()
    }

    /// Total characters across all turns.
    pub async fn char_count(&self) -> usize {
        self.state.lock().await.chars
    }

    /// Atomically return every turn and clear the buffer and its log.  If
    /// the log cannot be truncated nothing is removed.
    #[instrument(skip(self))]
    pub async fn drain(&self) -> Result<Vec<ConversationTurn>> {
        let mut state = self.state.lock().await;
        if let Some(path) = &self.log_path {
            let path = path.clone();
            fsio::blocking(move || fsio::write_atomic(&path, b"")).await?;
        }
        let count = state.turns.len();
        let drained = state.remove_front(count);
        debug!(turns = drained.len(), "buffer drained");
        Ok(drained)
    }

    /// Copy the oldest `max_turns` turns (all turns when `None`) without
    /// removing them.
    pub async fn snapshot_window(&self, max_turns: Option<usize>) -> WindowTicket {
        let state = self.state.lock().await;
        let take = max_turns.map_or(state.turns.len(), |n| n.min(state.turns.len()));
        WindowTicket {
            turns: state.turns.iter().take(take).cloned().collect(),
            generation: state.generation,
        }
    }

    /// Remove exactly the turns captured by `ticket` and return how many
    /// remain.
    ///
    /// The daily log is rewritten with the remaining turns first; the
    /// in-memory buffer only changes once that succeeded.  Fails with
    /// [`MemoryError::StaleWindow`] if turns were removed since the ticket
    /// was taken.
    #[instrument(skip(self, ticket), fields(window = ticket.len()))]
    pub async fn commit_window(&self, ticket: WindowTicket) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.generation != ticket.generation {
            return Err(MemoryError::StaleWindow);
        }

        if let Some(path) = &self.log_path {
            let mut contents = String::new();
            for turn in state.turns.iter().skip(ticket.len()) {
                contents.push_str(&serde_json::to_string(turn)?);
                contents.push('\n');
            }
            let path = path.clone();
            fsio::blocking(move || fsio::write_atomic(&path, contents.as_bytes())).await?;
        }

        state.remove_front(ticket.len());
        debug!(
            removed = ticket.len(),
            remaining = state.turns.len(),
            "summary window committed"
        );
        Ok(state.turns.len())
    }

    /// The last `n` turns, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let state = self.state.lock().await;
        let skip = state.turns.len().saturating_sub(n);
        state.turns.iter().skip(skip).cloned().collect()
    }

    /// The last `max_turns` turns rendered one per line, keeping at most the
    /// last `max_chars` characters.
    pub async fn render_recent(&self, max_turns: usize, max_chars: usize) -> String {
        let rendered = self
            .recent(max_turns)
            .await
            .iter()
            .map(ConversationTurn::render)
            .collect::<Vec<_>>()
            .join("\n");
        tail_chars(&rendered, max_chars).to_owned()
    }

    /// The local day the buffer currently belongs to.
    pub async fn day(&self) -> NaiveDate {
        self.state.lock().await.day
    }

    /// Move the buffer to `today`.  Returns the previous day if it changed,
    /// so the caller can close the old day with a summarization cycle.
    pub async fn rotate_if_new_day(&self, today: NaiveDate) -> Option<NaiveDate> {
        let mut state = self.state.lock().await;
        if state.day == today {
            return None;
        }
        let previous = std::mem::replace(&mut state.day, today);
        info!(%previous, %today, pending_turns = state.turns.len(), "day rolled over");
        Some(previous)
    }
}

/// The last `max_chars` characters of `text`, on a char boundary.
pub(crate) fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let skip = total - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map_or(text.len(), |(i, _)| i);
    &text[start..]
}
