//! In-session overlays: the status table (F9) and the account picker
//! (F10).
//!
//! While an overlay is open the supervisor buffers child output and
//! routes stdin to us, so the overlay owns the screen without the child
//! racing it. Everything is restored before returning, on every path.

use acmux_core::AccountId;
use acmux_scheduler::{ScoredCandidate, SchedulerContext, rank};
use acmux_supervisor::{
    InputRoute, OverlayTrigger, Supervisor, SupervisorCommand, SupervisorEvent, terminal_size,
};
use acmux_usage::AccountUsageSnapshot;
use anyhow::Result;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

pub enum OverlayOutcome {
    /// Dismissed; back to the child.
    Closed,
    /// The user picked an account to switch to (None = best available).
    SwitchTo(Option<AccountId>),
    /// A session-level event arrived while the overlay was open; the
    /// caller must handle it.
    Interrupted(SupervisorEvent),
}

pub async fn show(
    sup: &mut Supervisor,
    ctx: &mut SchedulerContext,
    current: &AccountId,
    trigger: OverlayTrigger,
) -> Result<OverlayOutcome> {
    let handle = sup.handle();
    handle.send(SupervisorCommand::PauseOutput).await;
    handle
        .send(SupervisorCommand::SetInputRoute(InputRoute::Driver))
        .await;

    let outcome = match trigger {
        OverlayTrigger::Status => status_overlay(sup, ctx, current).await,
        OverlayTrigger::Switch => switch_overlay(sup, ctx, current).await,
    };

    handle
        .send(SupervisorCommand::SetInputRoute(InputRoute::Child))
        .await;
    handle.send(SupervisorCommand::ResumeOutput).await;
    // The overlay scribbled over the child's screen; a resize nudge makes
    // full-screen children repaint.
    if let Some((rows, cols)) = terminal_size() {
        handle.send(SupervisorCommand::Resize { rows, cols }).await;
    }
    outcome
}

async fn status_overlay(
    sup: &mut Supervisor,
    ctx: &mut SchedulerContext,
    current: &AccountId,
) -> Result<OverlayOutcome> {
    let (snapshots, ranked) = ranked_snapshots(ctx).await?;
    let registry = ctx.registry_state();
    let mut screen = String::from("\r\n  account pool\r\n");
    screen.push_str("  account          session  window   score\r\n");
    for candidate in &ranked {
        screen.push_str(&render_row(candidate, &snapshots, &registry, current));
    }
    for snapshot in snapshots.iter().filter(|s| s.is_errored()) {
        screen.push_str(&format!(
            "    {:<14} usage probe failed: {}\r\n",
            snapshot.account_id,
            snapshot.error.as_deref().unwrap_or("unknown")
        ));
    }
    screen.push_str("\r\n  press any key to close\r\n");
    write_screen(&screen).await?;

    match sup.next_event().await {
        Some(SupervisorEvent::Input(_)) | Some(SupervisorEvent::Overlay(_)) | None => {
            Ok(OverlayOutcome::Closed)
        }
        Some(event) => Ok(OverlayOutcome::Interrupted(event)),
    }
}

async fn switch_overlay(
    sup: &mut Supervisor,
    ctx: &mut SchedulerContext,
    current: &AccountId,
) -> Result<OverlayOutcome> {
    let (snapshots, ranked) = ranked_snapshots(ctx).await?;
    let registry = ctx.registry_state();
    let mut screen = String::from("\r\n  switch account\r\n");
    for (i, candidate) in ranked.iter().take(9).enumerate() {
        screen.push_str(&format!("  {})", i + 1));
        screen.push_str(&render_row(candidate, &snapshots, &registry, current));
    }
    screen.push_str("  0) best available\r\n");
    screen.push_str("\r\n  1-9 switch, 0 best, esc cancel\r\n");
    write_screen(&screen).await?;

    loop {
        match sup.next_event().await {
            Some(SupervisorEvent::Input(bytes)) => {
                match parse_switch_key(&bytes, ranked.len().min(9)) {
                    Some(SwitchKey::Best) => return Ok(OverlayOutcome::SwitchTo(None)),
                    Some(SwitchKey::Pick(index)) => {
                        return Ok(OverlayOutcome::SwitchTo(Some(
                            ranked[index].account_id.clone(),
                        )));
                    }
                    Some(SwitchKey::Cancel) => return Ok(OverlayOutcome::Closed),
                    None => {}
                }
            }
            Some(SupervisorEvent::Overlay(_)) | None => return Ok(OverlayOutcome::Closed),
            Some(event) => return Ok(OverlayOutcome::Interrupted(event)),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SwitchKey {
    Pick(usize),
    Best,
    Cancel,
}

/// First actionable key anywhere in a stdin chunk. Terminals and pastes
/// deliver multiple bytes per read, so scanning only the chunk head
/// would drop keys.
fn parse_switch_key(bytes: &[u8], count: usize) -> Option<SwitchKey> {
    for &byte in bytes {
        match byte {
            b'0' | b'b' => return Some(SwitchKey::Best),
            b'1'..=b'9' => {
                let index = (byte - b'1') as usize;
                if index < count {
                    return Some(SwitchKey::Pick(index));
                }
            }
            0x1b | b'q' => return Some(SwitchKey::Cancel),
            _ => {}
        }
    }
    None
}

async fn ranked_snapshots(
    ctx: &mut SchedulerContext,
) -> Result<(Vec<AccountUsageSnapshot>, Vec<ScoredCandidate>)> {
    let snapshots = ctx.snapshots().await?;
    let registry = ctx.registry_state();
    let usable: Vec<AccountUsageSnapshot> = snapshots
        .iter()
        .filter(|s| !s.is_errored())
        .cloned()
        .collect();
    let ranked = rank(&usable, &registry, Utc::now(), ctx.scoring());
    Ok((snapshots, ranked))
}

fn render_row(
    candidate: &ScoredCandidate,
    snapshots: &[AccountUsageSnapshot],
    registry: &acmux_registry::RegistryState,
    current: &AccountId,
) -> String {
    let snapshot = snapshots
        .iter()
        .find(|s| s.account_id == candidate.account_id);
    let (session, window) = snapshot
        .map(|s| (s.session_remaining_pct, s.window_remaining_pct))
        .unwrap_or((0.0, 0.0));

    let mut notes = Vec::new();
    if &candidate.account_id == current {
        notes.push("current");
    }
    if registry.is_account_active(&candidate.account_id) {
        notes.push("active");
    }
    if registry.last_used_account.as_ref() == Some(&candidate.account_id) {
        notes.push("last used");
    }
    let marker = if &candidate.account_id == current { '*' } else { ' ' };
    let notes = if notes.is_empty() {
        String::new()
    } else {
        format!("  ({})", notes.join(", "))
    };

    format!(
        "  {} {:<14} {:>5.1}%  {:>5.1}%  {:>6.1}{}\r\n",
        marker, candidate.account_id, session, window, candidate.final_score, notes
    )
}

async fn write_screen(screen: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(screen.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
