//! Router error types.
//!
//! Individual provider failures are reported as [`ProviderCallError`] and are
//! always absorbed by failover.  Only the terminal outcomes of a logical
//! request, plus configuration and persistence problems, surface as
//! [`RouterError`].

use std::path::PathBuf;

use crate::adapter::CallErrorKind;
use crate::profile::ProviderRole;
use crate::router::{AttemptOutcome, RoutingAttempt};

/// Unified error type for the request router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    // -- Routing outcomes ----------------------------------------------------
    /// Every eligible candidate was tried and none succeeded, or no candidate
    /// was eligible to begin with (`attempts` is then empty).
    #[error("all providers exhausted for role {role} after {} attempt(s)", .attempts.len())]
    AllProvidersExhausted {
        role: ProviderRole,
        attempts: Vec<RoutingAttempt>,
    },

    /// The per-request overall deadline elapsed before any candidate
    /// succeeded.  Remaining candidates were abandoned.
    #[error("routing deadline of {deadline_ms}ms exceeded for role {role}")]
    DeadlineExceeded {
        role: ProviderRole,
        deadline_ms: u64,
        attempts: Vec<RoutingAttempt>,
    },

    // -- Configuration errors ------------------------------------------------
    /// A provider profile failed validation.
    #[error("invalid provider profile `{id}`: {reason}")]
    InvalidProfile { id: String, reason: String },

    /// Two profiles were registered under the same id.
    #[error("duplicate provider id: {id}")]
    DuplicateProvider { id: String },

    /// The HTTP client could not be constructed.
    #[error("http client error: {reason}")]
    HttpClient { reason: String },

    // -- Persistence ---------------------------------------------------------
    /// Reading or writing the cooldown snapshot failed.
    #[error("cooldown snapshot at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the router crate.
pub type Result<T> = std::result::Result<T, RouterError>;

const TEMPORARILY_UNAVAILABLE: &str = "I'm having trouble reaching the language model services right now. \
     This is most likely temporary, so please try again in a moment.";

const NOT_CONFIGURED: &str = "No language model providers are currently available. \
     Please check the API keys, quotas and provider configuration.";

impl RouterError {
    /// The attempt log of a failed routing request, if this error came from
    /// one.
    pub fn attempts(&self) -> &[RoutingAttempt] {
        match self {
            Self::AllProvidersExhausted { attempts, .. }
            | Self::DeadlineExceeded { attempts, .. } => attempts,
            _ => &[],
        }
    }

    /// Whether this error is a terminal routing outcome (as opposed to a
    /// configuration or persistence problem).
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::AllProvidersExhausted { .. } | Self::DeadlineExceeded { .. }
        )
    }

    /// Whether every recorded attempt failed on authentication.  A bad key is
    /// not transient, so callers surface it differently.
    pub fn only_auth_failures(&self) -> bool {
        let attempts = self.attempts();
        !attempts.is_empty()
            && attempts
                .iter()
                .all(|a| a.outcome == AttemptOutcome::Error(CallErrorKind::AuthError))
    }

    /// A reply suitable for showing to the chat partner instead of raw error
    /// text.
    pub fn user_facing_reply(&self) -> &'static str {
        match self {
            Self::DeadlineExceeded { .. } => TEMPORARILY_UNAVAILABLE,
            Self::AllProvidersExhausted { attempts, .. }
                if !attempts.is_empty() && !self.only_auth_failures() =>
            {
                TEMPORARILY_UNAVAILABLE
            }
            _ => NOT_CONFIGURED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(id: &str, outcome: AttemptOutcome) -> RoutingAttempt {
        RoutingAttempt {
            provider_id: id.into(),
            outcome,
            latency_ms: 5,
        }
    }

    #[test]
    fn empty_exhaustion_points_at_configuration() {
        let err = RouterError::AllProvidersExhausted {
            role: ProviderRole::Chat,
            attempts: vec![],
        };
        assert!(err.is_exhaustion());
        assert_eq!(err.user_facing_reply(), NOT_CONFIGURED);
    }

    #[test]
    fn auth_only_failures_point_at_configuration() {
        let err = RouterError::AllProvidersExhausted {
            role: ProviderRole::Chat,
            attempts: vec![
                attempt("a", AttemptOutcome::Error(CallErrorKind::AuthError)),
                attempt("b", AttemptOutcome::Error(CallErrorKind::AuthError)),
            ],
        };
        assert!(err.only_auth_failures());
        assert_eq!(err.user_facing_reply(), NOT_CONFIGURED);
    }

    #[test]
    fn transient_failures_are_temporary() {
        let err = RouterError::AllProvidersExhausted {
            role: ProviderRole::Memory,
            attempts: vec![
                attempt("a", AttemptOutcome::Error(CallErrorKind::AuthError)),
                attempt("b", AttemptOutcome::Timeout),
            ],
        };
        assert!(!err.only_auth_failures());
        assert_eq!(err.user_facing_reply(), TEMPORARILY_UNAVAILABLE);
        assert_eq!(err.attempts().len(), 2);
    }

    #[test]
    fn display_includes_attempt_count() {
        let err = RouterError::AllProvidersExhausted {
            role: ProviderRole::Chat,
            attempts: vec![attempt("a", AttemptOutcome::Timeout)],
        };
        assert_eq!(
            err.to_string(),
            "all providers exhausted for role chat after 1 attempt(s)"
        );
    }

    #[test]
    fn config_errors_have_no_attempts() {
        let err = RouterError::DuplicateProvider { id: "x".into() };
        assert!(!err.is_exhaustion());
        assert!(err.attempts().is_empty());
    }
}
