//! Conversation memory for the companion.
//!
//! Keeps today's conversation in a bounded [`ConversationBuffer`], and when
//! it grows past a threshold compresses the oldest turns into a scored
//! [`MemoryEntry`] through the memory-role router.  Entries accumulate in an
//! append-only, human-readable [`MemoryStore`].
//!
//! ## Modules
//!
//! - [`turn`] -- Conversation turns.
//! - [`buffer`] -- In-memory buffer mirrored to the daily log.
//! - [`store`] -- The long-term memory file.
//! - [`summarizer`] -- Turns-to-entry summarization via the router.
//! - [`engine`] -- Threshold policy and clear-after-success cycles.
//! - [`context`] -- Chat prompt assembly from memory and recent turns.
//! - [`runtime_state`] -- Last-activity record for the chat front end.
//! - [`error`] -- Memory error types.

pub mod buffer;
pub mod context;
pub mod engine;
pub mod error;
mod fsio;
pub mod runtime_state;
pub mod store;
pub mod summarizer;
pub mod turn;

pub use buffer::{ConversationBuffer, SizeUnit, WindowTicket};
pub use context::{ContextBuilder, ContextLimits};
pub use engine::{DiagnosticReport, MemoryEngine, MemoryPolicy, SummaryOutcome};
pub use error::{MemoryError, Result, SummarizeFailure};
pub use runtime_state::RuntimeState;
pub use store::{DEFAULT_IMPORTANCE, MemoryEntries, MemoryEntry, MemoryStore};
pub use summarizer::{SummaryPrompt, Summarizer, parse_summary_output};
pub use turn::{ConversationTurn, Speaker};
