//! Error types for the companion-memory crate.
//!
//! All buffer, store and engine operations return [`MemoryError`] via
//! [`Result`].

use std::path::{Path, PathBuf};

use companion_router::RouterError;
use thiserror::Error;

/// Alias for `Result<T, MemoryError>`.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Why a summarization attempt produced no memory entry.  Always
/// recoverable: the conversation buffer is left untouched.
#[derive(Debug, Error)]
pub enum SummarizeFailure {
    /// No memory-role provider answered.
    #[error("memory providers unavailable: {0}")]
    Router(#[from] RouterError),

    /// A provider answered but the reply held no summary text.
    #[error("summarizer returned no usable summary")]
    EmptySummary,
}

/// Errors that can occur in the memory subsystem.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Reading or writing an on-disk file failed.  Nothing was partially
    /// written.
    #[error("persistence error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Summarization failed; the buffer is preserved for the next cycle.
    #[error(transparent)]
    Summarize(#[from] SummarizeFailure),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A turn was rejected before reaching the buffer.
    #[error("invalid turn: {0}")]
    InvalidTurn(String),

    /// The buffer was drained between taking a summary window and committing
    /// it.  The window is discarded and the cycle can be retried.
    #[error("conversation buffer changed while summarizing")]
    StaleWindow,

    /// A blocking file task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for MemoryError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl MemoryError {
    pub(crate) fn persistence(path: &Path, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this is a recoverable summarization failure.
    pub fn is_summarize_failure(&self) -> bool {
        matches!(self, Self::Summarize(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_router::ProviderRole;

    #[test]
    fn summarize_failure_displays_transparently() {
        let err = MemoryError::from(SummarizeFailure::EmptySummary);
        assert!(err.is_summarize_failure());
        assert_eq!(err.to_string(), "summarizer returned no usable summary");
    }

    #[test]
    fn router_error_converts_into_summarize_failure() {
        let failure = SummarizeFailure::from(RouterError::AllProvidersExhausted {
            role: ProviderRole::Memory,
            attempts: vec![],
        });
        assert!(failure.to_string().starts_with("memory providers unavailable"));
    }

    #[test]
    fn persistence_error_names_path() {
        let err = MemoryError::persistence(
            Path::new("/tmp/memory.md"),
            std::io::Error::other("disk full"),
        );
        assert_eq!(
            err.to_string(),
            "persistence error at /tmp/memory.md: disk full"
        );
    }
}
