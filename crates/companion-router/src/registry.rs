//! Provider registry.
//!
//! Holds the ranked [`ProviderProfile`]s of every role.  The registry itself
//! is immutable after construction; eligibility is answered against a
//! [`CooldownTracker`] at query time.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::cooldown::CooldownTracker;
use crate::error::{Result, RouterError};
use crate::profile::{ProviderProfile, ProviderRole};

/// Ordered provider profiles grouped by role.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    by_role: HashMap<ProviderRole, Vec<ProviderProfile>>,
}

impl ProviderRegistry {
    /// Build a registry from `profiles`.
    ///
    /// Profiles are validated, ids must be unique, and each role's list is
    /// sorted ascending by priority.  Ties keep their declaration order.
    pub fn new(profiles: impl IntoIterator<Item = ProviderProfile>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut by_role: HashMap<ProviderRole, Vec<ProviderProfile>> = HashMap::new();

        for profile in profiles {
            profile.validate()?;
            if !seen.insert(profile.id.clone()) {
                return Err(RouterError::DuplicateProvider { id: profile.id });
            }
            by_role.entry(profile.role).or_default().push(profile);
        }

        for list in by_role.values_mut() {
            list.sort_by_key(|p| p.priority);
        }

        for (role, list) in &by_role {
            tracing::info!(
                role = %role,
                providers = list.len(),
                order = %list.iter().map(|p| p.id.as_str()).collect::<Vec<_>>().join(","),
                "provider role registered"
            );
        }

        Ok(Self { by_role })
    }

    /// All profiles of `role` in failover order, regardless of eligibility.
    pub fn profiles(&self, role: ProviderRole) -> &[ProviderProfile] {
        self.by_role.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Profiles of `role` that are not cooling down at `now`, in failover
    /// order.  Returns an empty list (not an error) when none are eligible.
    pub fn eligible_candidates(
        &self,
        role: ProviderRole,
        tracker: &CooldownTracker,
        now: DateTime<Utc>,
    ) -> Vec<&ProviderProfile> {
        self.profiles(role)
            .iter()
            .filter(|p| tracker.is_eligible(&p.id, now))
            .collect()
    }

    /// Look up a profile by id.
    pub fn get(&self, id: &str) -> Option<&ProviderProfile> {
        self.by_role.values().flatten().find(|p| p.id == id)
    }

    /// Total number of registered profiles.
    pub fn len(&self) -> usize {
        self.by_role.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CallErrorKind;
    use crate::cooldown::BackoffPolicy;

    fn profile(id: &str, role: ProviderRole, priority: i32) -> ProviderProfile {
        ProviderProfile::new(id, role, priority, "http://localhost", "m")
    }

    #[test]
    fn candidates_are_sorted_by_priority() {
        let registry = ProviderRegistry::new([
            profile("c", ProviderRole::Chat, 3),
            profile("a", ProviderRole::Chat, 1),
            profile("b", ProviderRole::Chat, 2),
            profile("m", ProviderRole::Memory, 1),
        ])
        .unwrap();

        let ids: Vec<_> = registry
            .profiles(ProviderRole::Chat)
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(registry.profiles(ProviderRole::Memory).len(), 1);
        assert!(registry.profiles(ProviderRole::Vision).is_empty());
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn equal_priorities_keep_declaration_order() {
        let registry = ProviderRegistry::new([
            profile("first", ProviderRole::Chat, 1),
            profile("second", ProviderRole::Chat, 1),
        ])
        .unwrap();
        assert_eq!(registry.profiles(ProviderRole::Chat)[0].id, "first");
    }

    #[test]
    fn cooling_providers_are_filtered() {
        let registry = ProviderRegistry::new([
            profile("a", ProviderRole::Chat, 1),
            profile("b", ProviderRole::Chat, 2),
        ])
        .unwrap();
        let tracker = CooldownTracker::new(BackoffPolicy::default());
        let now = Utc::now();
        tracker.record_failure("a", CallErrorKind::RateLimited, now);

        let eligible = registry.eligible_candidates(ProviderRole::Chat, &tracker, now);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, "b");
    }

    #[test]
    fn all_cooling_yields_empty_list() {
        let registry = ProviderRegistry::new([profile("a", ProviderRole::Memory, 1)]).unwrap();
        let tracker = CooldownTracker::new(BackoffPolicy::default());
        let now = Utc::now();
        tracker.record_failure("a", CallErrorKind::ServerError, now);
        assert!(
            registry
                .eligible_candidates(ProviderRole::Memory, &tracker, now)
                .is_empty()
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = ProviderRegistry::new([
            profile("a", ProviderRole::Chat, 1),
            profile("a", ProviderRole::Memory, 1),
        ])
        .unwrap_err();
        assert!(matches!(err, RouterError::DuplicateProvider { id } if id == "a"));
    }

    #[test]
    fn get_finds_across_roles() {
        let registry = ProviderRegistry::new([
            profile("a", ProviderRole::Chat, 1),
            profile("v", ProviderRole::Vision, 1),
        ])
        .unwrap();
        assert_eq!(registry.get("v").map(|p| p.role), Some(ProviderRole::Vision));
        assert!(registry.get("missing").is_none());
    }
}
