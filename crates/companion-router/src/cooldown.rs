//! Per-provider cooldown tracking.
//!
//! Every failed call pushes the provider out of candidate selection for a
//! window that doubles with each consecutive failure, capped at
//! [`BackoffPolicy::max_delay`].  A single success fully rehabilitates the
//! provider.
//!
//! State is held in a [`DashMap`] keyed by provider id, so mutations of one
//! provider are mutually exclusive while unrelated providers never contend.
//! By default the state lives only as long as the process; a snapshot can be
//! saved and restored when restart amnesia is not wanted.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapter::CallErrorKind;
use crate::error::{Result, RouterError};

// ---------------------------------------------------------------------------
// Backoff policy
// ---------------------------------------------------------------------------

/// Exponential backoff with a cap: `min(base * 2^(failures - 1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(30 * 60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Cooldown applied after the `failure_count`-th consecutive failure.
    /// Zero failures means no cooldown.
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        if failure_count == 0 {
            return Duration::ZERO;
        }
        let exponent = (failure_count - 1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Mutable failure state of one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// The provider is excluded from selection until this instant.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Kind of the most recent failure, for diagnostics.
    #[serde(default)]
    pub last_error: Option<CallErrorKind>,
}

impl CooldownState {
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_none_or(|until| until <= now)
    }

    /// Time left until the provider becomes eligible again.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.cooldown_until
            .and_then(|until| (until - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Records failures per provider id and answers eligibility queries.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    policy: BackoffPolicy,
    states: DashMap<String, CooldownState>,
}

impl CooldownTracker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            states: DashMap::new(),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Record a failed call and return the cooldown that was applied.
    pub fn record_failure(
        &self,
        provider_id: &str,
        kind: CallErrorKind,
        now: DateTime<Utc>,
    ) -> Duration {
        let mut state = self.states.entry(provider_id.to_owned()).or_default();
        state.failure_count = state.failure_count.saturating_add(1);
        let delay = self.policy.delay_for(state.failure_count);
        let delta = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(1));
        state.cooldown_until = Some(now + delta);
        state.last_error = Some(kind);

        warn!(
            provider = provider_id,
            error_kind = %kind,
            failures = state.failure_count,
            cooldown_secs = delay.as_secs(),
            "provider failed, cooling down"
        );

        delay
    }

    /// Record a successful call: the provider is fully rehabilitated.
    pub fn record_success(&self, provider_id: &str) {
        if let Some(mut state) = self.states.get_mut(provider_id) {
            if state.failure_count > 0 {
                debug!(
                    provider = provider_id,
                    previous_failures = state.failure_count,
                    "provider recovered"
                );
            }
            *state = CooldownState::default();
        }
    }

    /// Pure read: whether the provider may be selected at `now`.
    pub fn is_eligible(&self, provider_id: &str, now: DateTime<Utc>) -> bool {
        self.states
            .get(provider_id)
            .is_none_or(|state| state.is_eligible(now))
    }

    /// Snapshot of one provider's state (default if it never failed).
    pub fn state(&self, provider_id: &str) -> CooldownState {
        self.states
            .get(provider_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of every provider that has ever failed.
    pub fn snapshot(&self) -> BTreeMap<String, CooldownState> {
        self.states
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Replace the tracked state with `states`, dropping entries whose
    /// cooldown already expired at `now`.
    pub fn restore(&self, states: BTreeMap<String, CooldownState>, now: DateTime<Utc>) {
        self.states.clear();
        for (id, state) in states {
            if !state.is_eligible(now) {
                self.states.insert(id, state);
            }
        }
    }

    // -- Persistence ---------------------------------------------------------

    /// Write the current state to `path` as JSON (temp file + rename).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        let persistence = |source| RouterError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = dir.unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(persistence)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persistence)?;
        tmp.write_all(&json).map_err(persistence)?;
        tmp.as_file().sync_all().map_err(persistence)?;
        tmp.persist(path).map_err(|e| persistence(e.error))?;

        debug!(path = %path.display(), providers = self.states.len(), "cooldown snapshot saved");
        Ok(())
    }

    /// Restore state previously written by [`save_to`](Self::save_to).  A
    /// missing file restores nothing.
    pub fn load_from(&self, path: &Path, now: DateTime<Utc>) -> Result<()> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(RouterError::Persistence {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let states: BTreeMap<String, CooldownState> = serde_json::from_slice(&bytes)?;
        self.restore(states, now);
        info!(
            path = %path.display(),
            still_cooling = self.states.len(),
            "cooldown snapshot restored"
        );
        Ok(())
    }
}
