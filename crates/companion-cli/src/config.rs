//! Application configuration.
//!
//! Read from `companion.toml` (or the path given with `--config` /
//! `COMPANION_CONFIG`).  API keys can be given inline or, preferably, by
//! naming an environment variable with `api_key_env`; a `.env` file in the
//! working directory is loaded before the config is resolved.
//!
//! ```toml
//! debug = false
//! data_dir = "data"
//!
//! [router]
//! base_delay_secs = 60
//! max_delay_secs = 1800
//! strategy = "sequential"
//!
//! [[providers]]
//! id = "openrouter-main"
//! role = "chat"
//! priority = 1
//! kind = "openai"
//! endpoint = "https://openrouter.ai/api/v1"
//! model = "openrouter/auto"
//! api_key_env = "OPENROUTER_API_KEY"
//!
//! [memory]
//! threshold = 300
//! window = 150
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use companion_memory::{ContextLimits, MemoryPolicy, SizeUnit};
use companion_router::{
    BackoffPolicy, ProviderProfile, ProviderRole, RouterConfig, RoutingStrategy, WireFormat,
};
use serde::Deserialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Verbose logging, payload sizes and reply previews.
    pub debug: bool,
    /// Directory holding the daily log, memory file and state files.
    pub data_dir: PathBuf,
    /// Optional persona/style text sent as the chat system message.
    pub persona_file: Option<PathBuf>,
    /// Optional replacement for the summarization instruction template.
    pub summary_prompt_file: Option<PathBuf>,
    pub router: RouterSection,
    pub providers: Vec<ProviderSection>,
    pub memory: MemorySection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            data_dir: PathBuf::from("data"),
            persona_file: None,
            summary_prompt_file: None,
            router: RouterSection::default(),
            providers: Vec::new(),
            memory: MemorySection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub overall_deadline_secs: Option<u64>,
    pub strategy: RoutingStrategy,
    pub sticky_window_secs: Option<u64>,
    /// Keep cooldowns across restarts in `cooldowns.json`.
    pub persist_cooldowns: bool,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_delay_secs: 1800,
            overall_deadline_secs: None,
            strategy: RoutingStrategy::Sequential,
            sticky_window_secs: None,
            persist_cooldowns: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSection {
    pub id: String,
    pub role: ProviderRole,
    pub priority: i32,
    #[serde(default)]
    pub kind: WireFormat,
    pub endpoint: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub threshold: usize,
    pub threshold_unit: SizeUnit,
    pub window: Option<usize>,
    pub default_importance: u8,
    pub summary_chars: usize,
    pub recent_context_chars: usize,
    pub recent_context_turns: usize,
    pub long_memory_chars: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            threshold: 300,
            threshold_unit: SizeUnit::Turns,
            window: None,
            default_importance: 3,
            summary_chars: 400,
            recent_context_chars: 2000,
            recent_context_turns: 50,
            long_memory_chars: 1500,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load `.env`, then the TOML file at `path`.  Returns `None` when the
    /// file does not exist; the caller falls back to the defaults and reports
    /// it once logging is set up.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        Self::parse(&content)
            .map(Some)
            .with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("chat_today.log")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.data_dir.join("memory.md")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn cooldowns_path(&self) -> PathBuf {
        self.data_dir.join("cooldowns.json")
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(self.router.base_delay_secs),
            Duration::from_secs(self.router.max_delay_secs),
        )
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            overall_deadline: self.router.overall_deadline_secs.map(Duration::from_secs),
            strategy: self.router.strategy,
            sticky_window: self.router.sticky_window_secs.map(Duration::from_secs),
            debug: self.debug,
        }
    }

    pub fn memory_policy(&self) -> MemoryPolicy {
        MemoryPolicy {
            threshold: self.memory.threshold,
            window: self.memory.window,
        }
    }

    pub fn context_limits(&self) -> ContextLimits {
        ContextLimits {
            long_memory_chars: self.memory.long_memory_chars,
            recent_turns: self.memory.recent_context_turns,
            recent_chars: self.memory.recent_context_chars,
        }
    }

    /// Resolve every `[[providers]]` entry into a profile, reading keys from
    /// the environment where configured.
    pub fn profiles(&self) -> Vec<ProviderProfile> {
        self.providers
            .iter()
            .map(|p| p.to_profile(|name| std::env::var(name).ok()))
            .collect()
    }
}

impl ProviderSection {
    fn to_profile(&self, env: impl Fn(&str) -> Option<String>) -> ProviderProfile {
        let key = match (&self.api_key, &self.api_key_env) {
            (Some(key), _) => key.clone(),
            (None, Some(var)) => env(var).filter(|v| !v.trim().is_empty()).unwrap_or_else(|| {
                warn!(provider = %self.id, env = %var, "API key variable is not set");
                String::new()
            }),
            (None, None) => String::new(),
        };

        let mut profile = ProviderProfile::new(
            self.id.clone(),
            self.role,
            self.priority,
            self.endpoint.clone(),
            self.model.clone(),
        )
        .with_wire(self.kind)
        .with_api_key(key);

        if let Some(t) = self.temperature {
            profile.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            profile.max_tokens = m;
        }
        if let Some(ms) = self.timeout_ms {
            profile.timeout_ms = ms;
        }
        profile
    }
}
