//! Provider profiles.
//!
//! A [`ProviderProfile`] is the static description of one provider + key
//! pair.  Profiles are immutable once loaded; the mutable per-provider state
//! lives in the [`CooldownTracker`](crate::cooldown::CooldownTracker).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// The functional purpose a provider call serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    /// Conversational replies to the chat partner.
    Chat,
    /// Diary-style summarization of the conversation buffer.
    Memory,
    /// Image-to-text descriptions.
    Vision,
}

impl ProviderRole {
    /// Every role, in diagnostic display order.
    pub const ALL: [ProviderRole; 3] = [Self::Chat, Self::Memory, Self::Vision];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Memory => "memory",
            Self::Vision => "vision",
        }
    }
}

impl fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Which request/response dialect the HTTP adapter speaks to a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// OpenAI Chat Completions and compatible endpoints (OpenRouter,
    /// DeepSeek, vLLM, ...).
    #[default]
    OpenAi,
    /// Google Gemini `generateContent`.
    Gemini,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Static description of one provider endpoint + key + model combination.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Unique identifier, also the key of the provider's cooldown state.
    pub id: String,

    /// Which role this profile serves.
    pub role: ProviderRole,

    /// Failover rank within the role.  Lower is tried first.
    pub priority: i32,

    /// Request dialect.
    #[serde(default)]
    pub wire: WireFormat,

    /// Base URL of the API (e.g. `https://openrouter.ai/api/v1`).
    pub endpoint: String,

    /// Model identifier sent with every request.
    pub model: String,

    /// API key.  Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_temperature() -> f32 {
    0.5
}

fn default_max_tokens() -> u32 {
    700
}

fn default_timeout_ms() -> u64 {
    45_000
}

impl ProviderProfile {
    /// Create a profile with default generation parameters.
    pub fn new(
        id: impl Into<String>,
        role: ProviderRole,
        priority: i32,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            priority,
            wire: WireFormat::default(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_wire(mut self, wire: WireFormat) -> Self {
        self.wire = wire;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the profile for values that would make every call fail.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| RouterError::InvalidProfile {
            id: self.id.clone(),
            reason: reason.to_owned(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(invalid("endpoint must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(invalid("model must not be empty"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be greater than zero"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("temperature must be within 0.0..=2.0"));
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderProfile")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("priority", &self.priority)
            .field("wire", &self.wire)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ProviderProfile {
        ProviderProfile::new(
            "openrouter-1",
            ProviderRole::Chat,
            1,
            "https://openrouter.ai/api/v1",
            "openrouter/auto",
        )
    }

    #[test]
    fn defaults_are_applied() {
        let p = profile();
        assert_eq!(p.wire, WireFormat::OpenAi);
        assert_eq!(p.max_tokens, 700);
        assert_eq!(p.timeout(), Duration::from_secs(45));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let p = profile().with_api_key("sk-secret-value");
        let rendered = format!("{p:?}");
        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn api_key_is_not_serialized() {
        let p = profile().with_api_key("sk-secret-value");
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("sk-secret-value"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let json = r#"{
            "id": "gemini-a",
            "role": "memory",
            "priority": 2,
            "wire": "gemini",
            "endpoint": "https://generativelanguage.googleapis.com",
            "model": "gemini-1.5-flash",
            "api_key": "k"
        }"#;
        let p: ProviderProfile = serde_json::from_str(json).unwrap();
        assert_eq!(p.role, ProviderRole::Memory);
        assert_eq!(p.wire, WireFormat::Gemini);
        assert_eq!(p.api_key, "k");
        assert_eq!(p.timeout_ms, 45_000);
    }

    #[test]
    fn validation_rejects_empty_endpoint_and_zero_timeout() {
        let mut p = profile();
        p.endpoint = " ".into();
        assert!(matches!(
            p.validate(),
            Err(RouterError::InvalidProfile { .. })
        ));

        let p = profile().with_timeout(Duration::ZERO);
        assert!(p.validate().is_err());
    }

    #[test]
    fn role_display_matches_serde() {
        for role in ProviderRole::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{role}\""));
        }
    }
}
