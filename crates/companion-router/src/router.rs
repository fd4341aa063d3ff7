//! Request routing with cooldown-based failover.
//!
//! A [`RequestRouter`] turns one logical request into a sequence of provider
//! calls.  Candidates come from the [`RouterContext`] in priority order; the
//! first success wins, every failure puts the provider on cooldown and the
//! router moves on.  Only the router mutates the cooldown tracker, and it
//! does so only after a call has settled, so a call that was cancelled by a
//! timeout can never report back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{CallErrorKind, ChatAdapter, ChatPayload, ChatReply, ProviderCallError};
use crate::cooldown::{BackoffPolicy, CooldownTracker};
use crate::error::{Result, RouterError};
use crate::profile::{ProviderProfile, ProviderRole};
use crate::registry::ProviderRegistry;

// ---------------------------------------------------------------------------
// Attempt log
// ---------------------------------------------------------------------------

/// How a single provider call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "kind")]
pub enum AttemptOutcome {
    Success,
    Error(CallErrorKind),
    Timeout,
}

impl AttemptOutcome {
    fn from_kind(kind: CallErrorKind) -> Self {
        match kind {
            CallErrorKind::Timeout => Self::Timeout,
            other => Self::Error(other),
        }
    }
}

/// One entry of the per-request attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingAttempt {
    pub provider_id: String,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
}

impl RoutingAttempt {
    fn new(provider_id: &str, outcome: AttemptOutcome, latency: Duration) -> Self {
        Self {
            provider_id: provider_id.to_owned(),
            outcome,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// A successful routed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedReply {
    pub text: String,
    /// Id of the provider that produced `text`.
    pub provider_id: String,
    /// Every attempt made, the successful one last.
    pub attempts: Vec<RoutingAttempt>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How candidates of one request are tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// One candidate at a time in priority order.
    #[default]
    Sequential,
    /// All eligible candidates at once; the first success wins and the rest
    /// are cancelled without penalty.
    Racing,
}

/// Behavioural knobs of a [`RequestRouter`].
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Upper bound on the whole request, across all candidates.
    pub overall_deadline: Option<Duration>,
    pub strategy: RoutingStrategy,
    /// Prefer the last successful provider of a role for this long.
    pub sticky_window: Option<Duration>,
    /// Log payload sizes and reply previews.
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Shared routing state: the immutable registry plus the mutable cooldown
/// tracker.  Constructed once and passed around by reference.
#[derive(Debug)]
pub struct RouterContext {
    registry: ProviderRegistry,
    cooldowns: CooldownTracker,
}

impl RouterContext {
    pub fn new(registry: ProviderRegistry, policy: BackoffPolicy) -> Self {
        Self {
            registry,
            cooldowns: CooldownTracker::new(policy),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    /// Profiles of `role` eligible at `now`, in failover order.
    pub fn eligible_candidates(
        &self,
        role: ProviderRole,
        now: DateTime<Utc>,
    ) -> Vec<&ProviderProfile> {
        self.registry
            .eligible_candidates(role, &self.cooldowns, now)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Orchestrates logical requests across ranked providers.
pub struct RequestRouter {
    context: Arc<RouterContext>,
    adapter: Arc<dyn ChatAdapter>,
    config: RouterConfig,
    sticky: Mutex<HashMap<ProviderRole, (String, DateTime<Utc>)>>,
}

impl std::fmt::Debug for RequestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRouter")
            .field("context", &self.context)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestRouter {
    pub fn new(
        context: Arc<RouterContext>,
        adapter: Arc<dyn ChatAdapter>,
        config: RouterConfig,
    ) -> Self {
        Self {
            context,
            adapter,
            config,
            sticky: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<RouterContext> {
        &self.context
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one logical request for `role`.
    ///
    /// Returns the first successful reply, or
    /// [`RouterError::AllProvidersExhausted`] once every eligible candidate
    /// failed (immediately, with no attempts, when none was eligible), or
    /// [`RouterError::DeadlineExceeded`] when the overall deadline ran out.
    pub async fn route(&self, role: ProviderRole, payload: &ChatPayload) -> Result<RoutedReply> {
        let now = Utc::now();
        let mut candidates = self.context.eligible_candidates(role, now);
        self.prefer_sticky(role, &mut candidates, now);

        if candidates.is_empty() {
            warn!(
                role = %role,
                configured = self.context.registry.profiles(role).len(),
                "no eligible providers"
            );
            return Err(RouterError::AllProvidersExhausted {
                role,
                attempts: Vec::new(),
            });
        }

        if self.config.debug {
            debug!(
                role = %role,
                candidates = candidates.len(),
                payload_chars = payload.char_len(),
                has_image = payload.image.is_some(),
                "routing request"
            );
        }

        let result = match self.config.strategy {
            RoutingStrategy::Sequential => self.route_sequential(role, payload, candidates).await,
            RoutingStrategy::Racing => self.route_racing(role, payload, candidates).await,
        };

        match &result {
            Ok(reply) => {
                info!(
                    role = %role,
                    provider = %reply.provider_id,
                    attempts = reply.attempts.len(),
                    "request routed"
                );
                if self.config.debug {
                    debug!(
                        provider = %reply.provider_id,
                        preview = %reply.text.chars().take(120).collect::<String>(),
                        "reply preview"
                    );
                }
            }
            Err(e) => warn!(role = %role, attempts = e.attempts().len(), error = %e, "request failed"),
        }

        result
    }

    // -- Sequential ----------------------------------------------------------

    async fn route_sequential(
        &self,
        role: ProviderRole,
        payload: &ChatPayload,
        candidates: Vec<&ProviderProfile>,
    ) -> Result<RoutedReply> {
        let deadline = self.config.overall_deadline.map(|d| Instant::now() + d);
        let mut attempts = Vec::with_capacity(candidates.len());

        for profile in candidates {
            let mut timeout = profile.timeout();
            let mut capped_by_deadline = false;
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(self.deadline_exceeded(role, attempts));
                }
                if left < timeout {
                    timeout = left;
                    capped_by_deadline = true;
                }
            }

            let started = Instant::now();
            let result = self.call_with_timeout(profile, payload, timeout).await;
            let latency = started.elapsed();

            match result {
                Ok(reply) => {
                    attempts.push(RoutingAttempt::new(&profile.id, AttemptOutcome::Success, latency));
                    return Ok(self.succeed(role, profile, reply, attempts));
                }
                Err(e)
                    if capped_by_deadline
                        && e.kind == CallErrorKind::Timeout
                        && deadline.is_some_and(|d| Instant::now() >= d) =>
                {
                    // Cut short by the request deadline, not by the provider.
                    attempts.push(RoutingAttempt::new(&profile.id, AttemptOutcome::Timeout, latency));
                    return Err(self.deadline_exceeded(role, attempts));
                }
                Err(e) => {
                    attempts.push(RoutingAttempt::new(
                        &profile.id,
                        AttemptOutcome::from_kind(e.kind),
                        latency,
                    ));
                    self.fail(role, profile, &e);
                }
            }
        }

        Err(RouterError::AllProvidersExhausted { role, attempts })
    }

    // -- Racing --------------------------------------------------------------

    async fn route_racing(
        &self,
        role: ProviderRole,
        payload: &ChatPayload,
        candidates: Vec<&ProviderProfile>,
    ) -> Result<RoutedReply> {
        let deadline = self.config.overall_deadline.map(|d| Instant::now() + d);
        let mut attempts = Vec::with_capacity(candidates.len());

        let mut pending: FuturesUnordered<_> = candidates
            .into_iter()
            .map(|profile| async move {
                let started = Instant::now();
                let result = self
                    .call_with_timeout(profile, payload, profile.timeout())
                    .await;
                (profile, result, started.elapsed())
            })
            .collect();

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    // In-flight calls are dropped here and never penalized.
                    Err(_) => return Err(self.deadline_exceeded(role, attempts)),
                },
                None => pending.next().await,
            };

            let Some((profile, result, latency)) = next else {
                break;
            };

            match result {
                Ok(reply) => {
                    attempts.push(RoutingAttempt::new(&profile.id, AttemptOutcome::Success, latency));
                    return Ok(self.succeed(role, profile, reply, attempts));
                }
                Err(e) => {
                    attempts.push(RoutingAttempt::new(
                        &profile.id,
                        AttemptOutcome::from_kind(e.kind),
                        latency,
                    ));
                    self.fail(role, profile, &e);
                }
            }
        }

        Err(RouterError::AllProvidersExhausted { role, attempts })
    }

    // -- Helpers -------------------------------------------------------------

    /// One provider call bounded by `timeout`.  The adapter future is dropped
    /// when the timeout fires.  An empty reply counts as malformed.
    async fn call_with_timeout(
        &self,
        profile: &ProviderProfile,
        payload: &ChatPayload,
        timeout: Duration,
    ) -> std::result::Result<ChatReply, ProviderCallError> {
        match tokio::time::timeout(timeout, self.adapter.call(profile, payload, timeout)).await {
            Ok(Ok(reply)) if reply.text.trim().is_empty() => {
                Err(ProviderCallError::malformed("provider returned an empty reply"))
            }
            Ok(result) => result,
            Err(_) => Err(ProviderCallError::timeout(format!(
                "no response within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn succeed(
        &self,
        role: ProviderRole,
        profile: &ProviderProfile,
        reply: ChatReply,
        attempts: Vec<RoutingAttempt>,
    ) -> RoutedReply {
        self.context.cooldowns.record_success(&profile.id);
        if self.config.sticky_window.is_some() {
            self.sticky_map()
                .insert(role, (profile.id.clone(), Utc::now()));
        }
        RoutedReply {
            text: reply.text,
            provider_id: profile.id.clone(),
            attempts,
        }
    }

    fn fail(&self, role: ProviderRole, profile: &ProviderProfile, error: &ProviderCallError) {
        if error.kind == CallErrorKind::AuthError {
            warn!(
                provider = %profile.id,
                role = %role,
                "provider rejected its API key; check the configured credentials"
            );
        } else {
            debug!(provider = %profile.id, error = %error, "provider call failed");
        }
        self.context
            .cooldowns
            .record_failure(&profile.id, error.kind, Utc::now());

        let mut sticky = self.sticky_map();
        if sticky.get(&role).is_some_and(|(id, _)| *id == profile.id) {
            sticky.remove(&role);
        }
    }

    fn deadline_exceeded(&self, role: ProviderRole, attempts: Vec<RoutingAttempt>) -> RouterError {
        let deadline_ms = self
            .config
            .overall_deadline
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        RouterError::DeadlineExceeded {
            role,
            deadline_ms,
            attempts,
        }
    }

    /// Move the role's sticky provider to the front while its window lasts.
    fn prefer_sticky(
        &self,
        role: ProviderRole,
        candidates: &mut Vec<&ProviderProfile>,
        now: DateTime<Utc>,
    ) {
        let Some(window) = self.config.sticky_window else {
            return;
        };
        let Some((id, since)) = self.sticky_map().get(&role).cloned() else {
            return;
        };

        let within = (now - since).to_std().map_or(true, |elapsed| elapsed <= window);
        if !within {
            self.sticky_map().remove(&role);
            return;
        }
        if let Some(pos) = candidates.iter().position(|p| p.id == id) {
            let preferred = candidates.remove(pos);
            candidates.insert(0, preferred);
        }
    }

    fn sticky_map(&self) -> MutexGuard<'_, HashMap<ProviderRole, (String, DateTime<Utc>)>> {
        self.sticky.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
