//! Candidate filtering, ranking, and the all-exhausted fallback.

use crate::scorer::{ScoredCandidate, score};
use acmux_config::ScoringConfig;
use acmux_core::AccountId;
use acmux_registry::RegistryState;
use acmux_usage::AccountUsageSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// The selector's verdict.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub account_id: AccountId,
    pub session_remaining_pct: f64,
    pub window_remaining_pct: f64,
    /// True when every eligible account was exhausted and this one was
    /// chosen purely for its earliest reset.
    pub is_rate_limited: bool,
    /// Set only on the all-exhausted path: when this account becomes
    /// usable again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

/// Pick the account with the most remaining capacity.
///
/// Errored snapshots and `exclude` are dropped first. If every remaining
/// candidate is exhausted, the one with the earliest session reset wins
/// (minimizing wait time) and is flagged `is_rate_limited`. Otherwise the
/// highest [`score`] wins; ties keep snapshot input order.
///
/// Pure: a function of its inputs and the registry snapshot only.
pub fn select(
    snapshots: &[AccountUsageSnapshot],
    registry: &RegistryState,
    exclude: Option<&AccountId>,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> Option<Selection> {
    let eligible: Vec<&AccountUsageSnapshot> = snapshots
        .iter()
        .filter(|s| !s.is_errored() && Some(&s.account_id) != exclude)
        .collect();
    if eligible.is_empty() {
        return None;
    }

    let (available, exhausted): (Vec<_>, Vec<_>) =
        eligible.into_iter().partition(|s| !s.is_exhausted());

    if available.is_empty() {
        // Every candidate is rate-limited: wait out the shortest reset.
        // min_by keeps the first of equal keys, i.e. input order.
        let soonest = exhausted.into_iter().min_by_key(|s| {
            s.session_reset_at
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })?;
        debug!(account = %soonest.account_id, reset_at = ?soonest.session_reset_at,
            "all accounts exhausted, picking earliest reset");
        return Some(Selection {
            account_id: soonest.account_id.clone(),
            session_remaining_pct: soonest.session_remaining_pct,
            window_remaining_pct: soonest.window_remaining_pct,
            is_rate_limited: true,
            resets_at: soonest.session_reset_at,
        });
    }

    // Strictly-greater comparison keeps the first of equally scored
    // candidates in input order.
    let mut best: Option<(ScoredCandidate, &AccountUsageSnapshot)> = None;
    for snapshot in available {
        let candidate = score(snapshot, registry, now, config);
        match &best {
            Some((current, _)) if candidate.final_score <= current.final_score => {}
            _ => best = Some((candidate, snapshot)),
        }
    }

    let (winner, snapshot) = best?;
    debug!(account = %winner.account_id, score = winner.final_score, "selected account");
    Some(Selection {
        account_id: winner.account_id,
        session_remaining_pct: snapshot.session_remaining_pct,
        window_remaining_pct: snapshot.window_remaining_pct,
        is_rate_limited: false,
        resets_at: None,
    })
}

/// Full score breakdown for every scoreable candidate, ranked descending.
/// Used by the status overlay and `acmux accounts`.
pub fn rank(
    snapshots: &[AccountUsageSnapshot],
    registry: &RegistryState,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> Vec<ScoredCandidate> {
    let mut candidates: Vec<ScoredCandidate> = snapshots
        .iter()
        .filter(|s| !s.is_errored() && !s.is_exhausted())
        .map(|s| score(s, registry, now, config))
        .collect();
    // Stable sort: equal scores preserve snapshot input order.
    candidates.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}
