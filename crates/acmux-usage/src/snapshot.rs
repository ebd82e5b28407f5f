use acmux_core::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-account quota snapshot across the two overlapping windows.
///
/// Immutable once fetched; refreshed through [`crate::UsageCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountUsageSnapshot {
    pub account_id: AccountId,

    /// Set when the quota source could not report this account.
    /// An errored snapshot is excluded from selection until a later
    /// fetch clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Remaining capacity in the short session window (0-100).
    #[serde(default)]
    pub session_remaining_pct: f64,
    #[serde(default)]
    pub session_reset_at: Option<DateTime<Utc>>,

    /// Remaining capacity in the longer rolling window (0-100).
    #[serde(default)]
    pub window_remaining_pct: f64,
    #[serde(default)]
    pub window_reset_at: Option<DateTime<Utc>>,
}

impl AccountUsageSnapshot {
    /// A snapshot representing a per-account fetch failure.
    pub fn errored(account_id: AccountId, reason: impl Into<String>) -> Self {
        Self {
            account_id,
            error: Some(reason.into()),
            session_remaining_pct: 0.0,
            session_reset_at: None,
            window_remaining_pct: 0.0,
            window_reset_at: None,
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }

    /// Session window fully consumed.
    pub fn is_exhausted(&self) -> bool {
        self.session_remaining_pct <= 0.0
    }

    /// True when either reset instant is already in the past, meaning the
    /// snapshot describes windows that no longer exist.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.session_reset_at.is_some_and(|t| t <= now)
            || self.window_reset_at.is_some_and(|t| t <= now)
    }
}
