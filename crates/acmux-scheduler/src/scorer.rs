//! Pure capacity scoring for one account snapshot.

use acmux_config::ScoringConfig;
use acmux_core::AccountId;
use acmux_registry::RegistryState;
use acmux_usage::AccountUsageSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Score breakdown for one candidate. Derived on every selection call,
/// never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub account_id: AccountId,
    pub base_score: f64,
    pub session_bonus: f64,
    pub window_bonus: f64,
    pub active_penalty: f64,
    pub last_used_penalty: f64,
    pub final_score: f64,
}

/// Score a non-errored, non-exhausted snapshot.
///
/// `base` weighs the two remaining percentages; bonuses reward capacity
/// that is about to expire (use it or lose it) and saturate at the
/// configured caps; penalties push selection away from accounts already
/// in use and from the last-used account. Only rank order matters, so the
/// result is never clamped.
pub fn score(
    snapshot: &AccountUsageSnapshot,
    registry: &RegistryState,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> ScoredCandidate {
    let base_score = snapshot.session_remaining_pct * config.session_weight
        + snapshot.window_remaining_pct * config.window_weight;

    let session_bonus = expiry_bonus(
        snapshot.session_reset_at,
        now,
        3600.0,
        config.session_bonus_cap_hours,
        config.session_bonus_per_hour,
    );
    let window_bonus = expiry_bonus(
        snapshot.window_reset_at,
        now,
        86400.0,
        config.window_bonus_cap_days,
        config.window_bonus_per_day,
    );

    let active_penalty = if registry.is_account_active(&snapshot.account_id) {
        config.active_session_penalty
    } else {
        0.0
    };
    let last_used_penalty = if registry.last_used_account.as_ref() == Some(&snapshot.account_id) {
        config.last_used_penalty
    } else {
        0.0
    };

    let final_score =
        base_score + session_bonus + window_bonus - active_penalty - last_used_penalty;

    ScoredCandidate {
        account_id: snapshot.account_id.clone(),
        base_score,
        session_bonus,
        window_bonus,
        active_penalty,
        last_used_penalty,
        final_score,
    }
}

/// `(cap - min(time_until_reset, cap)) * rate`, monotonically decreasing
/// in time-to-reset. `unit_secs` converts the reset distance into the
/// cap's unit (hours or days). A reset already behind us counts as zero
/// distance, i.e. the maximal bonus.
fn expiry_bonus(
    reset_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    unit_secs: f64,
    cap: f64,
    rate: f64,
) -> f64 {
    let Some(reset_at) = reset_at else {
        return 0.0;
    };
    let units_until = (reset_at - now).num_seconds().max(0) as f64 / unit_secs;
    (cap - units_until.min(cap)) * rate
}
