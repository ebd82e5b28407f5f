//! The `acmux run` driver: account selection, session supervision, and
//! the explicit relaunch loop that carries a session across accounts.
//!
//! Failover is a flat loop here, not a recursive relaunch: each
//! iteration runs exactly one supervised child, and a switch just feeds
//! the next iteration a new account and resume id. The stdin reader
//! thread and the raw-mode guard live outside the loop so they survive
//! every switch.

use acmux_config::{AccountConfig, GlobalConfig};
use acmux_core::{AccountId, AppError};
use acmux_failover::{
    CommandSync, ConversationSync, FailoverMachine, NoopSync, SwitchReason, latest_session_id,
    sync_best_effort, with_resume,
};
use acmux_registry::Registry;
use acmux_scheduler::SchedulerContext;
use acmux_supervisor::{
    RawModeGuard, SessionSpec, SpawnFailure, Supervisor, SupervisorCommand, SupervisorEvent,
    run_passthrough,
};
use acmux_usage::{CommandUsageSource, OptimisticUsageSource, UsageCache, UsageSource};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::overlay;

const SIGTERM_EXIT_CODE: i32 = 143;
const SIGINT_EXIT_CODE: i32 = 130;

/// What ended one supervised session.
enum SessionOutcome {
    Exited(i32),
    SwitchTo(AccountId),
    /// Killed by a process-level signal; carries the exit code to report.
    Terminated(i32),
}

pub async fn run(
    config: GlobalConfig,
    account: Option<String>,
    no_failover: bool,
    child_args: Vec<String>,
) -> Result<i32> {
    config.validate()?;
    if config.accounts.is_empty() {
        return Err(AppError::NoAccountsConfigured.into());
    }

    let mut ctx = scheduler_context(&config)?;

    let mut current = match account {
        Some(id) => {
            let id = AccountId::from(id.as_str());
            if config.account(&id).is_none() {
                return Err(AppError::AccountNotFound(id).into());
            }
            id
        }
        None => initial_selection(&mut ctx).await?,
    };

    let sync: Box<dyn ConversationSync> = match &config.sync.command {
        Some(cmd) => Box::new(CommandSync::new(cmd.clone())),
        None => Box::new(NoopSync),
    };

    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let mut machine = FailoverMachine::new();
    let mut resume_id: Option<String> = None;
    // Raw mode turns ctrl-c into a forwarded byte, but external SIGINT
    // and SIGTERM must still unregister cleanly.
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("failed to install SIGINT handler")?;

    // One stdin reader for the whole run; its receiver is loaned to each
    // supervisor in turn.
    let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    let mut stdin_rx = Some(stdin_rx);
    let mut stdin_thread_started = false;

    let raw_guard = RawModeGuard::enter();

    let exit_code = loop {
        let acct = config
            .account(&current)
            .ok_or_else(|| AppError::AccountNotFound(current.clone()))?;
        let spec = session_spec(&config, acct, &child_args, resume_id.as_deref());

        ctx.registry().register(&current);
        info!(account = %current, resume = ?resume_id, "launching supervised session");

        let rx = stdin_rx.take().context("stdin receiver not returned")?;
        let mut sup = match Supervisor::start(spec, rx) {
            Ok(sup) => sup,
            Err(SpawnFailure { error, stdin_rx: rx }) => {
                ctx.registry().unregister();
                if stdin_thread_started {
                    // Mid-run PTY loss: the stdin thread already owns the
                    // terminal, so passthrough cannot take over cleanly.
                    return Err(error.into());
                }
                warn!(error = %error, "PTY unavailable, running child directly");
                drop(rx);
                drop(raw_guard);
                let acct = config
                    .account(&current)
                    .ok_or_else(|| AppError::AccountNotFound(current.clone()))?;
                let args = child_args_for(&config, &child_args, resume_id.as_deref());
                return run_passthrough(&config.child_command, &args, &account_env(acct)).await;
            }
        };
        if !stdin_thread_started {
            spawn_stdin_thread(stdin_tx.clone());
            stdin_thread_started = true;
        }

        let outcome = supervise_session(
            &mut sup,
            &mut ctx,
            &mut machine,
            &config,
            &current,
            no_failover,
            &mut sigterm,
            &mut sigint,
        )
        .await;

        match outcome {
            SessionOutcome::Exited(code) => {
                let (_, rx) = sup.join().await?;
                stdin_rx = Some(rx);
                ctx.registry().unregister();
                break code;
            }
            SessionOutcome::Terminated(code) => {
                sup.handle().send(SupervisorCommand::Kill).await;
                let (_, rx) = sup.join().await?;
                stdin_rx = Some(rx);
                ctx.registry().unregister();
                break code;
            }
            SessionOutcome::SwitchTo(target) => {
                sup.handle().send(SupervisorCommand::Kill).await;
                let (_, rx) = sup.join().await?;
                stdin_rx = Some(rx);

                if machine.drained().is_none() {
                    break 1;
                }
                sync_best_effort(sync.as_ref(), &current, &target).await;

                let target_cfg = config
                    .account(&target)
                    .ok_or_else(|| AppError::AccountNotFound(target.clone()))?;
                resume_id = latest_session_id(&target_cfg.config_dir, &cwd);
                if resume_id.is_none() {
                    warn!(account = %target, "no conversation to resume, starting fresh");
                }

                ctx.invalidate_usage();
                machine.switched();
                info!(from = %current, to = %target, "account switch complete");
                current = target;
            }
        }
    };

    Ok(exit_code)
}

/// Event loop for one supervised child.
#[allow(clippy::too_many_arguments)]
async fn supervise_session(
    sup: &mut Supervisor,
    ctx: &mut SchedulerContext,
    machine: &mut FailoverMachine,
    config: &GlobalConfig,
    current: &AccountId,
    no_failover: bool,
    sigterm: &mut tokio::signal::unix::Signal,
    sigint: &mut tokio::signal::unix::Signal,
) -> SessionOutcome {
    loop {
        let event = tokio::select! {
            event = sup.next_event() => event,
            _ = sigterm.recv() => return SessionOutcome::Terminated(SIGTERM_EXIT_CODE),
            _ = sigint.recv() => return SessionOutcome::Terminated(SIGINT_EXIT_CODE),
        };
        let Some(event) = event else {
            // Task ended without an Exited event (killed elsewhere).
            return SessionOutcome::Exited(0);
        };

        match event {
            SupervisorEvent::Exited(code) => return SessionOutcome::Exited(code),
            SupervisorEvent::RateLimited => {
                info!(account = %current, "rate limit detected");
                if no_failover {
                    continue;
                }
                if !machine.on_rate_limited() {
                    continue;
                }
                if let Some(target) = resolve_switch(ctx, machine, config, current).await {
                    return SessionOutcome::SwitchTo(target);
                }
            }
            SupervisorEvent::Overlay(trigger) => {
                match overlay::show(sup, ctx, current, trigger).await {
                    Ok(overlay::OverlayOutcome::Closed) => {}
                    Ok(overlay::OverlayOutcome::SwitchTo(target)) => {
                        if !machine.on_manual_switch(target) {
                            continue;
                        }
                        if let Some(target) = resolve_switch(ctx, machine, config, current).await {
                            return SessionOutcome::SwitchTo(target);
                        }
                    }
                    Ok(overlay::OverlayOutcome::Interrupted(event)) => match event {
                        SupervisorEvent::Exited(code) => return SessionOutcome::Exited(code),
                        SupervisorEvent::RateLimited => {
                            if !no_failover && machine.on_rate_limited() {
                                if let Some(target) =
                                    resolve_switch(ctx, machine, config, current).await
                                {
                                    return SessionOutcome::SwitchTo(target);
                                }
                            }
                        }
                        _ => {}
                    },
                    Err(e) => warn!(error = %e, "overlay failed"),
                }
            }
            // Stray driver-routed input outside an overlay is dropped.
            SupervisorEvent::Input(_) => {}
        }
    }
}

/// Run the Resolving step: pick the replacement account. On success the
/// machine is left Draining; on failure it is reset to Running.
async fn resolve_switch(
    ctx: &mut SchedulerContext,
    machine: &mut FailoverMachine,
    config: &GlobalConfig,
    current: &AccountId,
) -> Option<AccountId> {
    let reason = machine.begin_resolving()?;
    ctx.invalidate_usage();

    let target = match &reason {
        SwitchReason::Manual {
            target: Some(target),
        } => {
            if config.account(target).is_some() {
                Some(target.clone())
            } else {
                warn!(account = %target, "requested account is not configured");
                None
            }
        }
        _ => match ctx.select_account(Some(current)).await {
            Ok(Some(selection)) => {
                if selection.is_rate_limited {
                    warn!(
                        account = %selection.account_id,
                        resets_at = ?selection.resets_at,
                        "all accounts exhausted, switching to the one resetting soonest"
                    );
                }
                Some(selection.account_id)
            }
            Ok(None) => {
                warn!("no eligible account to switch to, staying put");
                None
            }
            Err(e) => {
                warn!(error = %e, "usage fetch failed during switch, staying put");
                None
            }
        },
    };

    match target {
        Some(target) => {
            machine.resolved(target.clone());
            Some(target)
        }
        None => {
            machine.resolution_failed();
            None
        }
    }
}

/// First-launch selection. All-exhausted pools still launch (on the
/// account resetting soonest) so the user sees the child's own message.
async fn initial_selection(ctx: &mut SchedulerContext) -> Result<AccountId> {
    let selection = ctx
        .select_account(None)
        .await?
        .ok_or(AppError::NoEligibleAccount)?;
    if selection.is_rate_limited {
        warn!(
            account = %selection.account_id,
            resets_at = ?selection.resets_at,
            "every account is exhausted, launching on the one resetting soonest"
        );
    }
    Ok(selection.account_id)
}

pub(crate) fn scheduler_context(config: &GlobalConfig) -> Result<SchedulerContext> {
    let registry_path = acmux_config::paths::registry_path()
        .unwrap_or_else(|| std::env::temp_dir().join("acmux").join("registry.toml"));
    let source: Box<dyn UsageSource> = match &config.usage.command {
        Some(cmd) => Box::new(CommandUsageSource::new(cmd.clone())),
        None => Box::new(OptimisticUsageSource),
    };
    Ok(SchedulerContext::new(
        config.account_ids(),
        config.scoring.clone(),
        Registry::new(registry_path),
        UsageCache::new(Duration::from_secs(config.usage.cache_ttl_secs)),
        source,
    ))
}

fn child_args_for(
    config: &GlobalConfig,
    extra_args: &[String],
    resume_id: Option<&str>,
) -> Vec<String> {
    let mut args = config.child_args.clone();
    args.extend_from_slice(extra_args);
    match resume_id {
        Some(id) => with_resume(&args, id),
        None => args,
    }
}

/// Environment for the child: the account's env map, with the store
/// root exported as `CLAUDE_CONFIG_DIR` unless the account overrides it.
fn account_env(acct: &AccountConfig) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = acct
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !acct.env.contains_key("CLAUDE_CONFIG_DIR") {
        env.push((
            "CLAUDE_CONFIG_DIR".to_string(),
            acct.config_dir.to_string_lossy().into_owned(),
        ));
    }
    env
}

fn session_spec(
    config: &GlobalConfig,
    acct: &AccountConfig,
    extra_args: &[String],
    resume_id: Option<&str>,
) -> SessionSpec {
    SessionSpec {
        command: config.child_command.clone(),
        args: child_args_for(config, extra_args, resume_id),
        env: account_env(acct),
        rate_limit_markers: config.supervisor.rate_limit_markers.clone(),
    }
}

fn spawn_stdin_thread(tx: mpsc::Sender<Vec<u8>>) {
    std::thread::Builder::new()
        .name("acmux-stdin-reader".to_string())
        .spawn(move || {
            use std::io::Read;
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; 1024];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn acct(id: &str) -> AccountConfig {
        AccountConfig {
            id: AccountId::from(id),
            config_dir: PathBuf::from(format!("/tmp/{id}")),
            env: HashMap::new(),
        }
    }

    #[test]
    fn test_child_args_inject_resume() {
        let mut config = GlobalConfig::default();
        config.child_args = vec!["--model".to_string(), "opus".to_string()];
        let args = child_args_for(&config, &["-p".to_string()], Some("sess-1"));
        assert_eq!(args, vec!["--model", "opus", "-p", "--resume", "sess-1"]);
    }

    #[test]
    fn test_child_args_without_resume() {
        let config = GlobalConfig::default();
        let args = child_args_for(&config, &[], None);
        assert!(args.is_empty());
    }

    #[test]
    fn test_account_env_exports_store_root() {
        let env = account_env(&acct("work"));
        assert!(env.contains(&(
            "CLAUDE_CONFIG_DIR".to_string(),
            "/tmp/work".to_string()
        )));
    }

    #[test]
    fn test_account_env_respects_override() {
        let mut a = acct("work");
        a.env.insert(
            "CLAUDE_CONFIG_DIR".to_string(),
            "/custom".to_string(),
        );
        let env = account_env(&a);
        let values: Vec<&str> = env
            .iter()
            .filter(|(k, _)| k == "CLAUDE_CONFIG_DIR")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(values, vec!["/custom"]);
    }

    #[tokio::test]
    async fn test_run_rejects_empty_pool() {
        let config = GlobalConfig::default();
        let result = run(config, None, false, Vec::new()).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::NoAccountsConfigured)
        ));
    }

    #[tokio::test]
    async fn test_run_rejects_unknown_account() {
        let mut config = GlobalConfig::default();
        config.accounts.push(acct("work"));
        let result = run(config, Some("nope".to_string()), false, Vec::new()).await;
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AppError>(),
            Some(AppError::AccountNotFound(_))
        ));
    }
}
