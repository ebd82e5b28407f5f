//! `acmux accounts`: the pool at a glance.

use acmux_config::GlobalConfig;
use acmux_scheduler::rank;
use acmux_usage::AccountUsageSnapshot;
use anyhow::Result;
use chrono::Utc;

pub async fn list(config: GlobalConfig) -> Result<()> {
    if config.accounts.is_empty() {
        println!("no accounts configured");
        if let Some(path) = GlobalConfig::config_path() {
            println!("add [[accounts]] entries to {}", path.display());
        }
        return Ok(());
    }
    config.validate()?;

    let mut ctx = crate::run_cmd::scheduler_context(&config)?;
    let snapshots = ctx.snapshots().await?;
    let registry = ctx.registry_state();
    let usable: Vec<AccountUsageSnapshot> = snapshots
        .iter()
        .filter(|s| !s.is_errored())
        .cloned()
        .collect();
    let ranked = rank(&usable, &registry, Utc::now(), ctx.scoring());

    println!("{:<16} {:>8} {:>8} {:>8}  notes", "account", "session", "window", "score");
    for candidate in &ranked {
        let snapshot = usable
            .iter()
            .find(|s| s.account_id == candidate.account_id);
        let (session, window) = snapshot
            .map(|s| (s.session_remaining_pct, s.window_remaining_pct))
            .unwrap_or((0.0, 0.0));

        let mut notes = Vec::new();
        if snapshot.is_some_and(|s| s.is_exhausted()) {
            notes.push("exhausted".to_string());
            if let Some(reset) = snapshot.and_then(|s| s.session_reset_at) {
                notes.push(format!("resets {}", reset.format("%H:%M")));
            }
        }
        if registry.is_account_active(&candidate.account_id) {
            notes.push("active session".to_string());
        }
        if registry.last_used_account.as_ref() == Some(&candidate.account_id) {
            notes.push("last used".to_string());
        }

        println!(
            "{:<16} {:>7.1}% {:>7.1}% {:>8.1}  {}",
            candidate.account_id,
            session,
            window,
            candidate.final_score,
            notes.join(", ")
        );
    }

    for snapshot in snapshots.iter().filter(|s| s.is_errored()) {
        println!(
            "{:<16} usage probe failed: {}",
            snapshot.account_id,
            snapshot.error.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}
