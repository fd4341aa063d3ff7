//! Persisted runtime state owned by the chat front end.
//!
//! The core never reads this for routing or memory decisions.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::fsio;

/// Last-activity bookkeeping for proactive messaging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    #[serde(default)]
    pub last_user_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_nudge: Option<DateTime<Utc>>,
}

impl RuntimeState {
    /// Load from `path`.  A missing or corrupt file yields the default state.
    pub fn load(path: &Path) -> Self {
        let text = match fsio::read_or_empty(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "runtime state unreadable, starting fresh");
                return Self::default();
            }
        };
        if text.trim().is_empty() {
            return Self::default();
        }
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "runtime state corrupt, starting fresh");
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fsio::write_atomic(path, &json)
    }

    pub fn touch_user_activity(&mut self, now: DateTime<Utc>) {
        self.last_user_activity = Some(now);
    }

    pub fn touch_nudge(&mut self, now: DateTime<Utc>) {
        self.last_nudge = Some(now);
    }
}
