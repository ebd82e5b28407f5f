//! Short-lived snapshot cache with stale-reset auto-invalidation.

use crate::snapshot::AccountUsageSnapshot;
use crate::source::UsageSource;
use acmux_core::AccountId;
use anyhow::Result;
use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Caches the last fetched snapshot set for a few tens of seconds.
///
/// Beyond the TTL, the cache also self-invalidates when any cached reset
/// instant has already passed: the windows it describes no longer exist,
/// so serving them would mis-rank accounts.
pub struct UsageCache {
    ttl: Duration,
    cached: Option<CachedSnapshots>,
}

struct CachedSnapshots {
    fetched_at: Instant,
    snapshots: Vec<AccountUsageSnapshot>,
}

impl UsageCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, cached: None }
    }

    /// Return cached snapshots, fetching through `source` when the cache
    /// is empty, expired, or stale.
    pub async fn get(
        &mut self,
        source: &dyn UsageSource,
        accounts: &[AccountId],
    ) -> Result<Vec<AccountUsageSnapshot>> {
        if let Some(cached) = &self.cached {
            let now = Utc::now();
            let expired = cached.fetched_at.elapsed() >= self.ttl;
            let stale = cached.snapshots.iter().any(|s| s.is_stale(now));
            if !expired && !stale {
                return Ok(cached.snapshots.clone());
            }
            debug!(expired, stale, "usage cache invalidated");
        }

        let snapshots = source.fetch(accounts).await?;
        self.cached = Some(CachedSnapshots {
            fetched_at: Instant::now(),
            snapshots: snapshots.clone(),
        });
        Ok(snapshots)
    }

    /// Drop the cached set so the next `get` refetches.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        reset_in: ChronoDuration,
    }

    #[async_trait]
    impl UsageSource for CountingSource {
        async fn fetch(&self, accounts: &[AccountId]) -> Result<Vec<AccountUsageSnapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(accounts
                .iter()
                .map(|id| AccountUsageSnapshot {
                    account_id: id.clone(),
                    error: None,
                    session_remaining_pct: 50.0,
                    session_reset_at: Some(Utc::now() + self.reset_in),
                    window_remaining_pct: 50.0,
                    window_reset_at: Some(Utc::now() + ChronoDuration::days(1)),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl() {
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            reset_in: ChronoDuration::hours(1),
        };
        let mut cache = UsageCache::new(Duration::from_secs(60));
        let accounts = vec![AccountId::from("a")];

        cache.get(&source, &accounts).await.unwrap();
        cache.get(&source, &accounts).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_refetches_when_reset_passed() {
        // Snapshots whose reset instant is already behind us are stale
        // regardless of the TTL.
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            reset_in: ChronoDuration::milliseconds(-1),
        };
        let mut cache = UsageCache::new(Duration::from_secs(3600));
        let accounts = vec![AccountId::from("a")];

        cache.get(&source, &accounts).await.unwrap();
        cache.get(&source, &accounts).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = CountingSource {
            calls: AtomicUsize::new(0),
            reset_in: ChronoDuration::hours(1),
        };
        let mut cache = UsageCache::new(Duration::from_secs(60));
        let accounts = vec![AccountId::from("a")];

        cache.get(&source, &accounts).await.unwrap();
        cache.invalidate();
        cache.get(&source, &accounts).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
