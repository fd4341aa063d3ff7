//! Conversation turns.

use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Bot,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Bot => "Bot",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One message of the conversation.  Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub text: String,
}

impl ConversationTurn {
    /// A turn stamped with the current time.
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self::at(Utc::now(), speaker, text)
    }

    pub fn at(timestamp: DateTime<Utc>, speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            speaker,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text)
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self::new(Speaker::Bot, text)
    }

    /// Length in characters, the unit of character-based buffer sizing.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// `[HH:MM] Speaker: text` in local time, the form fed to the summarizer
    /// and to prompt context.
    pub fn render(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.with_timezone(&Local).format("%H:%M"),
            self.speaker,
            self.text
        )
    }
}
