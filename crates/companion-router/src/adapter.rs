//! The uniform chat-completion contract every provider backend satisfies.
//!
//! The router never speaks a vendor protocol directly.  It hands a
//! [`ChatPayload`] and a [`ProviderProfile`] to a [`ChatAdapter`] and gets
//! back either a [`ChatReply`] or a classified [`ProviderCallError`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::profile::ProviderProfile;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Classification of a single failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallErrorKind {
    /// The key was rejected (401/403).  Not transient.
    AuthError,
    /// Quota or rate limit hit (429, 402).
    RateLimited,
    /// The call did not finish within its timeout.
    Timeout,
    /// 5xx, connection failures and any other unexpected status.
    ServerError,
    /// The provider answered but the body held no usable text.
    MalformedResponse,
}

impl CallErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthError => "auth_error",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::MalformedResponse => "malformed_response",
        }
    }

    /// Whether retrying the same provider later may succeed without operator
    /// intervention.
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::AuthError)
    }
}

impl fmt::Display for CallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed provider call.  Always recoverable by failover.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderCallError {
    pub kind: CallErrorKind,
    pub message: String,
}

impl ProviderCallError {
    pub fn new(kind: CallErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::AuthError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::Timeout, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::ServerError, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(CallErrorKind::MalformedResponse, message)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Who authored a message in a [`ChatPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Raw image bytes attached to a vision request.
#[derive(Clone, PartialEq)]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Provider-agnostic request body for one logical request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatPayload {
    pub messages: Vec<ChatMessage>,
    /// Only meaningful for vision-role providers.
    pub image: Option<ImageAttachment>,
}

impl ChatPayload {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            image: None,
        }
    }

    /// A payload holding a single user message.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::user(text)])
    }

    /// Prepend a system message.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.messages.insert(0, ChatMessage::system(system));
        self
    }

    pub fn with_image(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.image = Some(ImageAttachment {
            mime_type: mime_type.into(),
            data,
        });
        self
    }

    /// All message contents joined into one prompt, in order.  Used by wire
    /// formats without a separate system channel.
    pub fn flattened(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Total characters across all messages.
    pub fn char_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
}

impl ChatReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// A backend capable of a single chat completion.
///
/// Implementations should honour `timeout` themselves where the transport
/// allows it; the router additionally enforces it by dropping the returned
/// future, so an abandoned call never reports back.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    async fn call(
        &self,
        profile: &ProviderProfile,
        payload: &ChatPayload,
        timeout: Duration,
    ) -> std::result::Result<ChatReply, ProviderCallError>;
}
