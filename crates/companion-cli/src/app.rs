//! Wiring of the router and memory engine from configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use companion_memory::{
    ContextBuilder, ConversationBuffer, MemoryEngine, MemoryStore, RuntimeState, Summarizer,
    SummaryPrompt,
};
use companion_router::{HttpChatAdapter, ProviderRegistry, RequestRouter, RouterContext};
use tracing::{info, warn};

use crate::config::AppConfig;

/// Everything a command needs, built once per process.
pub struct App {
    pub config: AppConfig,
    pub router: Arc<RequestRouter>,
    pub engine: MemoryEngine,
    pub context: ContextBuilder,
    pub state: RuntimeState,
}

impl App {
    pub fn build(config: AppConfig) -> Result<Self> {
        let registry =
            ProviderRegistry::new(config.profiles()).context("invalid provider configuration")?;
        if registry.is_empty() {
            warn!("no providers configured; every request will fail");
        }

        let router_context = Arc::new(RouterContext::new(registry, config.backoff()));
        if config.router.persist_cooldowns {
            router_context
                .cooldowns()
                .load_from(&config.cooldowns_path(), Utc::now())
                .context("failed to restore cooldowns")?;
        }

        let adapter = Arc::new(HttpChatAdapter::new(config.debug)?);
        let router = Arc::new(RequestRouter::new(
            router_context,
            adapter,
            config.router_config(),
        ));

        let buffer = Arc::new(
            ConversationBuffer::open(config.log_path(), config.memory.threshold_unit)
                .context("failed to open daily log")?,
        );
        let store = Arc::new(
            MemoryStore::open(config.memory_path(), config.memory.default_importance)
                .context("failed to open memory store")?,
        );

        let prompt = match &config.summary_prompt_file {
            Some(path) => SummaryPrompt::new(read_text(path)?),
            None => SummaryPrompt::default(),
        };
        let summarizer = Summarizer::new(Arc::clone(&router), prompt)
            .with_summary_chars(config.memory.summary_chars)
            .with_default_importance(config.memory.default_importance);

        let engine = MemoryEngine::new(buffer, store, summarizer, config.memory_policy());

        let mut context = ContextBuilder::new(config.context_limits());
        if let Some(path) = &config.persona_file {
            context = context.with_persona(read_text(path)?);
        }

        let state = RuntimeState::load(&config.state_path());

        info!(
            providers = router.context().registry().len(),
            data_dir = %config.data_dir.display(),
            "companion initialized"
        );

        Ok(Self {
            config,
            router,
            engine,
            context,
            state,
        })
    }

    /// Save the cooldown snapshot if persistence is enabled.  Failures are
    /// logged, never fatal.
    pub async fn save_cooldowns(&self) {
        if !self.config.router.persist_cooldowns {
            return;
        }
        let context = Arc::clone(self.router.context());
        let path = self.config.cooldowns_path();
        let saved =
            tokio::task::spawn_blocking(move || context.cooldowns().save_to(&path)).await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to save cooldowns"),
            Err(e) => warn!(error = %e, "cooldown save task failed"),
        }
    }

    /// Stamp user activity in the runtime state file.
    pub async fn touch_user_activity(&mut self) {
        self.state.touch_user_activity(Utc::now());
        let state = self.state.clone();
        let path = self.config.state_path();
        match tokio::task::spawn_blocking(move || state.save(&path)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to save runtime state"),
            Err(e) => warn!(error = %e, "runtime state save task failed"),
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
