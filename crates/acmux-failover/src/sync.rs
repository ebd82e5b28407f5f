//! Conversation sync between account stores, run around a switch.
//!
//! Sync is strictly best-effort: a failed or missing sync command means
//! the new account may start without the latest conversation state, but
//! it must never abort or delay the switch itself.

use acmux_core::AccountId;
use async_trait::async_trait;
use tracing::{debug, warn};

#[async_trait]
pub trait ConversationSync: Send + Sync {
    /// Propagate conversation state from `from`'s store to `to`'s store.
    async fn sync(&self, from: &AccountId, to: &AccountId) -> anyhow::Result<()>;
}

/// No configured sync command.
pub struct NoopSync;

#[async_trait]
impl ConversationSync for NoopSync {
    async fn sync(&self, from: &AccountId, to: &AccountId) -> anyhow::Result<()> {
        debug!(from = %from, to = %to, "no sync command configured, skipping");
        Ok(())
    }
}

/// Shells out to a user-configured command, appending the source and
/// destination account ids as the final two arguments.
pub struct CommandSync {
    command: Vec<String>,
}

impl CommandSync {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ConversationSync for CommandSync {
    async fn sync(&self, from: &AccountId, to: &AccountId) -> anyhow::Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            anyhow::bail!("sync command is empty");
        };
        let status = tokio::process::Command::new(program)
            .args(args)
            .arg(from.as_str())
            .arg(to.as_str())
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("sync command exited with {status}");
        }
        Ok(())
    }
}

/// Run a sync and swallow any failure with a warning.
pub async fn sync_best_effort(sync: &dyn ConversationSync, from: &AccountId, to: &AccountId) {
    if let Err(e) = sync.sync(from, to).await {
        warn!(from = %from, to = %to, error = %e, "conversation sync failed, switching anyway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(s: &str) -> AccountId {
        AccountId(s.to_string())
    }

    #[tokio::test]
    async fn test_noop_sync_succeeds() {
        assert!(NoopSync.sync(&acct("a"), &acct("b")).await.is_ok());
    }

    #[tokio::test]
    async fn test_command_sync_passes_account_ids() {
        // `sh -c '[ "$1" = from ] && [ "$2" = to ]' sh from to`
        let sync = CommandSync::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"[ "$1" = "acct-a" ] && [ "$2" = "acct-b" ]"#.to_string(),
            "sh".to_string(),
        ]);
        assert!(sync.sync(&acct("acct-a"), &acct("acct-b")).await.is_ok());
    }

    #[tokio::test]
    async fn test_command_sync_failure_is_error() {
        let sync = CommandSync::new(vec!["false".to_string()]);
        assert!(sync.sync(&acct("a"), &acct("b")).await.is_err());
    }

    #[tokio::test]
    async fn test_best_effort_swallows_failure() {
        let sync = CommandSync::new(vec!["false".to_string()]);
        // Must not panic or propagate.
        sync_best_effort(&sync, &acct("a"), &acct("b")).await;
    }

    #[tokio::test]
    async fn test_empty_command_is_error() {
        let sync = CommandSync::new(Vec::new());
        assert!(sync.sync(&acct("a"), &acct("b")).await.is_err());
    }
}
