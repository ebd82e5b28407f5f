//! Cross-process session registry.
//!
//! A single TOML file in the XDG state dir records which accounts have a
//! live supervising process plus the most recently selected account. Every
//! acmux instance reads and rewrites the whole file; there is deliberately
//! no locking. Concurrent writers can lose an update, which is acceptable:
//! the registry only biases account choice, it is never used for mutual
//! exclusion. Entries are keyed by OS pid, so a lost unregister self-heals
//! on the next stale sweep once that pid is gone.

use acmux_core::AccountId;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One live supervising process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRegistryEntry {
    pub account_id: AccountId,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Persisted registry contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default)]
    pub active_sessions: Vec<SessionRegistryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_account: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl RegistryState {
    pub fn is_account_active(&self, id: &AccountId) -> bool {
        self.active_sessions.iter().any(|e| &e.account_id == id)
    }
}

/// Handle to the shared registry file.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the registry, pruning entries whose pid is no longer alive.
    ///
    /// Never errors: unreadable or malformed state degrades to the empty
    /// default. The pruned state is not written back here; writes happen
    /// on the next register/unregister.
    pub fn load(&self) -> RegistryState {
        let raw = self.read_state();
        clean_stale(raw)
    }

    /// Record the calling process as supervising `account_id` and mark it
    /// as the most recently used account.
    ///
    /// Idempotent per process: any prior entry for this pid (e.g. after an
    /// in-process failover) is replaced.
    pub fn register(&self, account_id: &AccountId) {
        let mut state = self.load();
        let pid = std::process::id();
        state.active_sessions.retain(|e| e.pid != pid);
        state.active_sessions.push(SessionRegistryEntry {
            account_id: account_id.clone(),
            pid,
            started_at: Utc::now(),
        });
        state.last_used_account = Some(account_id.clone());
        state.last_used_at = Some(Utc::now());
        self.persist(&state);
    }

    /// Remove the calling process's entry. Best-effort; must run on every
    /// exit path, including signal-driven ones.
    pub fn unregister(&self) {
        let mut state = self.load();
        let pid = std::process::id();
        let before = state.active_sessions.len();
        state.active_sessions.retain(|e| e.pid != pid);
        if state.active_sessions.len() != before {
            debug!(pid, "unregistered session");
        }
        self.persist(&state);
    }

    fn read_state(&self) -> RegistryState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %e, "registry unreadable, using defaults");
                }
                return RegistryState::default();
            }
        };
        match toml::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "registry malformed, using defaults");
                RegistryState::default()
            }
        }
    }

    fn persist(&self, state: &RegistryState) {
        if let Err(e) = self.try_persist(state) {
            // Registry is a best-effort optimization; selection still works
            // without it.
            warn!(path = %self.path.display(), error = %e, "failed to persist registry");
        }
    }

    fn try_persist(&self, state: &RegistryState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(state).context("Failed to serialize registry")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Drop entries whose recorded pid is not alive.
///
/// A dead pid means a prior instance crashed or exited without
/// unregistering; pruning it is routine, not an error.
pub fn clean_stale(mut state: RegistryState) -> RegistryState {
    state.active_sessions.retain(|entry| {
        let alive = pid_alive(entry.pid);
        if !alive {
            debug!(pid = entry.pid, account = %entry.account_id, "pruning stale registry entry");
        }
        alive
    });
    state
}

/// Non-destructive liveness probe: signal 0 delivers nothing, but reports
/// whether the pid exists. EPERM still means "exists".
fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 performs only the permission/existence
    // check; no signal is delivered.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}
