//! The quota-source boundary: anything that can report usage snapshots.

use crate::snapshot::AccountUsageSnapshot;
use acmux_core::AccountId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::warn;

/// External quota data source.
///
/// Implementations must tolerate partial per-account failures: a failed
/// account comes back as an errored snapshot, never as a whole-call error.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn fetch(&self, accounts: &[AccountId]) -> Result<Vec<AccountUsageSnapshot>>;
}

/// Usage source that shells out to a configured probe command.
///
/// The command is invoked with the account ids appended as arguments and
/// must print a JSON array of snapshots on stdout. Accounts missing from
/// the output are reported as errored snapshots.
pub struct CommandUsageSource {
    command: Vec<String>,
}

impl CommandUsageSource {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl UsageSource for CommandUsageSource {
    async fn fetch(&self, accounts: &[AccountId]) -> Result<Vec<AccountUsageSnapshot>> {
        let (program, base_args) = self
            .command
            .split_first()
            .context("usage probe command is empty")?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(base_args);
        cmd.args(accounts.iter().map(|a| a.as_str()));

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run usage probe '{program}'"))?;

        if !output.status.success() {
            anyhow::bail!(
                "usage probe '{}' exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let reported: Vec<AccountUsageSnapshot> = serde_json::from_slice(&output.stdout)
            .context("usage probe output is not a JSON snapshot array")?;

        // Re-key by requested account: preserve pool order and mark
        // accounts the probe did not answer for as errored.
        let snapshots = accounts
            .iter()
            .map(|id| {
                reported
                    .iter()
                    .find(|s| &s.account_id == id)
                    .cloned()
                    .unwrap_or_else(|| {
                        warn!(account = %id, "usage probe returned no data for account");
                        AccountUsageSnapshot::errored(id.clone(), "no data from usage probe")
                    })
            })
            .collect();

        Ok(snapshots)
    }
}

/// Fallback source for pools without a configured probe: every account
/// reports full capacity, so selection degrades to the registry
/// penalties (avoid accounts already in use, rotate off the last one).
pub struct OptimisticUsageSource;

#[async_trait]
impl UsageSource for OptimisticUsageSource {
    async fn fetch(&self, accounts: &[AccountId]) -> Result<Vec<AccountUsageSnapshot>> {
        Ok(accounts
            .iter()
            .map(|id| AccountUsageSnapshot {
                account_id: id.clone(),
                error: None,
                session_remaining_pct: 100.0,
                session_reset_at: None,
                window_remaining_pct: 100.0,
                window_reset_at: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_source_parses_probe_output() {
        // Use a shell echo as a stand-in probe.
        let json = r#"[{"account_id":"work","session_remaining_pct":75.0,"window_remaining_pct":60.0}]"#;
        let source = CommandUsageSource::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo '{json}'"),
        ]);

        let accounts = vec![AccountId::from("work"), AccountId::from("personal")];
        let snapshots = source.fetch(&accounts).await.unwrap();

        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].account_id, AccountId::from("work"));
        assert_eq!(snapshots[0].session_remaining_pct, 75.0);
        // Account the probe ignored comes back errored, not missing.
        assert!(snapshots[1].is_errored());
    }

    #[tokio::test]
    async fn test_command_source_probe_failure_is_an_error() {
        let source = CommandUsageSource::new(vec!["false".to_string()]);
        let result = source.fetch(&[AccountId::from("a")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_optimistic_source_reports_full_capacity() {
        let accounts = vec![AccountId::from("a"), AccountId::from("b")];
        let snapshots = OptimisticUsageSource.fetch(&accounts).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().all(|s| !s.is_errored() && !s.is_exhausted()));
    }

    #[tokio::test]
    async fn test_command_source_rejects_garbage_output() {
        let source = CommandUsageSource::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo not-json".to_string(),
        ]);
        let result = source.fetch(&[AccountId::from("a")]).await;
        assert!(result.is_err());
    }
}
