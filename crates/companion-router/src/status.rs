//! Diagnostic snapshot of the router.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapter::CallErrorKind;
use crate::profile::ProviderRole;
use crate::router::RouterContext;

/// Health of one provider at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub id: String,
    pub role: ProviderRole,
    pub priority: i32,
    pub model: String,
    pub eligible: bool,
    pub failure_count: u32,
    pub cooldown_remaining_secs: u64,
    pub last_error: Option<CallErrorKind>,
    /// The last failure was a rejected key.  Waiting will not fix it.
    pub auth_failure: bool,
}

/// Providers of one role in failover order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleStatus {
    pub role: ProviderRole,
    pub eligible: usize,
    pub providers: Vec<ProviderStatus>,
}

impl RouterContext {
    /// Per-role provider health at `now`.  Roles without any configured
    /// provider are still listed.
    pub fn status(&self, now: DateTime<Utc>) -> Vec<RoleStatus> {
        ProviderRole::ALL
            .into_iter()
            .map(|role| {
                let providers: Vec<ProviderStatus> = self
                    .registry()
                    .profiles(role)
                    .iter()
                    .map(|p| {
                        let state = self.cooldowns().state(&p.id);
                        ProviderStatus {
                            id: p.id.clone(),
                            role,
                            priority: p.priority,
                            model: p.model.clone(),
                            eligible: state.is_eligible(now),
                            failure_count: state.failure_count,
                            cooldown_remaining_secs: state.remaining(now).as_secs(),
                            last_error: state.last_error,
                            auth_failure: state.last_error == Some(CallErrorKind::AuthError),
                        }
                    })
                    .collect();

                RoleStatus {
                    role,
                    eligible: providers.iter().filter(|p| p.eligible).count(),
                    providers,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::BackoffPolicy;
    use crate::profile::ProviderProfile;
    use crate::registry::ProviderRegistry;

    #[test]
    fn status_reports_cooldowns_and_auth_failures() {
        let registry = ProviderRegistry::new([
            ProviderProfile::new("a", ProviderRole::Chat, 1, "http://a", "m"),
            ProviderProfile::new("b", ProviderRole::Chat, 2, "http://b", "m"),
        ])
        .unwrap();
        let ctx = RouterContext::new(registry, BackoffPolicy::default());
        let now = Utc::now();
        ctx.cooldowns().record_failure("a", CallErrorKind::AuthError, now);

        let status = ctx.status(now);
        assert_eq!(status.len(), 3);

        let chat = &status[0];
        assert_eq!(chat.role, ProviderRole::Chat);
        assert_eq!(chat.eligible, 1);
        assert!(!chat.providers[0].eligible);
        assert!(chat.providers[0].auth_failure);
        assert_eq!(chat.providers[0].cooldown_remaining_secs, 60);
        assert!(chat.providers[1].eligible);

        assert!(status[2].providers.is_empty());
    }
}
