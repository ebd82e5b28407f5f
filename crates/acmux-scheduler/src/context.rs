//! The scheduler context: one explicitly constructed object owning the
//! usage cache, the quota source, and the registry handle. Passed to
//! whatever needs scheduling decisions; there are no module-level
//! singletons.

use crate::selector::{Selection, select};
use acmux_config::ScoringConfig;
use acmux_core::AccountId;
use acmux_registry::{Registry, RegistryState};
use acmux_usage::{AccountUsageSnapshot, UsageCache, UsageSource};
use anyhow::Result;
use chrono::Utc;

pub struct SchedulerContext {
    accounts: Vec<AccountId>,
    scoring: ScoringConfig,
    registry: Registry,
    cache: UsageCache,
    source: Box<dyn UsageSource>,
}

impl SchedulerContext {
    pub fn new(
        accounts: Vec<AccountId>,
        scoring: ScoringConfig,
        registry: Registry,
        cache: UsageCache,
        source: Box<dyn UsageSource>,
    ) -> Self {
        Self {
            accounts,
            scoring,
            registry,
            cache,
            source,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    /// Current snapshots, served from the short-lived cache.
    pub async fn snapshots(&mut self) -> Result<Vec<AccountUsageSnapshot>> {
        self.cache.get(self.source.as_ref(), &self.accounts).await
    }

    /// Registry state with stale entries pruned.
    pub fn registry_state(&self) -> RegistryState {
        self.registry.load()
    }

    /// Select the best account right now, optionally excluding one
    /// (the currently rate-limited account during failover).
    pub async fn select_account(&mut self, exclude: Option<&AccountId>) -> Result<Option<Selection>> {
        let snapshots = self.snapshots().await?;
        let registry_state = self.registry.load();
        Ok(select(
            &snapshots,
            &registry_state,
            exclude,
            Utc::now(),
            &self.scoring,
        ))
    }

    /// Force the next snapshot read to refetch (used after failover, when
    /// the old account's quota just changed).
    pub fn invalidate_usage(&mut self) {
        self.cache.invalidate();
    }
}
