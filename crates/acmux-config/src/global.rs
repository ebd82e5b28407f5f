//! Global configuration loaded from `~/.config/acmux/config.toml`.
//!
//! Declares the account pool, the supervised child command, scoring
//! weights, and the external collaborator hooks (usage probe, sync job).

use acmux_core::{AccountId, AppError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

const DEFAULT_CHILD_COMMAND: &str = "claude";
const DEFAULT_CACHE_TTL_SECS: u64 = 30;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Executable of the supervised interactive tool.
    #[serde(default = "default_child_command")]
    pub child_command: String,

    /// Extra arguments always passed to the child.
    #[serde(default)]
    pub child_args: Vec<String>,

    /// The account pool.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub usage: UsageSourceConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            child_command: default_child_command(),
            child_args: Vec::new(),
            accounts: Vec::new(),
            scoring: ScoringConfig::default(),
            supervisor: SupervisorConfig::default(),
            usage: UsageSourceConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// One account: a credential/quota domain the child can run under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: AccountId,

    /// Root of this account's credential + conversation store
    /// (e.g. a per-account `CLAUDE_CONFIG_DIR`).
    pub config_dir: PathBuf,

    /// Environment variables injected into the child for this account.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Tunable weights, bonuses, and penalties for account scoring.
///
/// Weights must sum to 1 so scores stay comparable across accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_session_weight")]
    pub session_weight: f64,
    #[serde(default = "default_window_weight")]
    pub window_weight: f64,

    /// Use-it-or-lose-it bonus for capacity expiring soon (session window).
    #[serde(default = "default_session_bonus_cap_hours")]
    pub session_bonus_cap_hours: f64,
    #[serde(default = "default_session_bonus_per_hour")]
    pub session_bonus_per_hour: f64,

    /// Analogous bonus for the rolling window, in days.
    #[serde(default = "default_window_bonus_cap_days")]
    pub window_bonus_cap_days: f64,
    #[serde(default = "default_window_bonus_per_day")]
    pub window_bonus_per_day: f64,

    /// Subtracted when the account already has a live supervised session.
    #[serde(default = "default_active_session_penalty")]
    pub active_session_penalty: f64,
    /// Subtracted when the account was the most recently selected one.
    #[serde(default = "default_last_used_penalty")]
    pub last_used_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            session_weight: default_session_weight(),
            window_weight: default_window_weight(),
            session_bonus_cap_hours: default_session_bonus_cap_hours(),
            session_bonus_per_hour: default_session_bonus_per_hour(),
            window_bonus_cap_days: default_window_bonus_cap_days(),
            window_bonus_per_day: default_window_bonus_per_day(),
            active_session_penalty: default_active_session_penalty(),
            last_used_penalty: default_last_used_penalty(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if (self.session_weight + self.window_weight - 1.0).abs() > 1e-6 {
            return Err(AppError::InvalidScoringWeights {
                session_weight: self.session_weight,
                window_weight: self.window_weight,
            });
        }
        Ok(())
    }
}

/// Supervisor tuning: rate-limit markers and overlay key sequences are
/// fixed in code; only the marker list is user-extensible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Output substrings that mean "this account just got rate-limited".
    #[serde(default = "default_rate_limit_markers")]
    pub rate_limit_markers: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            rate_limit_markers: default_rate_limit_markers(),
        }
    }
}

/// External usage probe: a command printing a JSON snapshot array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSourceConfig {
    /// Command (argv) invoked with the account ids appended.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Snapshot cache lifetime in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for UsageSourceConfig {
    fn default() -> Self {
        Self {
            command: None,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// External conversation/history sync job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Command (argv) invoked with the account ids appended.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

fn default_child_command() -> String {
    DEFAULT_CHILD_COMMAND.to_string()
}

fn default_session_weight() -> f64 {
    0.6
}

fn default_window_weight() -> f64 {
    0.4
}

fn default_session_bonus_cap_hours() -> f64 {
    24.0
}

fn default_session_bonus_per_hour() -> f64 {
    0.5
}

fn default_window_bonus_cap_days() -> f64 {
    7.0
}

fn default_window_bonus_per_day() -> f64 {
    2.5
}

fn default_active_session_penalty() -> f64 {
    15.0
}

fn default_last_used_penalty() -> f64 {
    5.0
}

fn default_rate_limit_markers() -> Vec<String> {
    vec![
        "Claude usage limit reached".to_string(),
        "usage limit reached".to_string(),
        "You've reached your limit".to_string(),
    ]
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl GlobalConfig {
    /// Load from `~/.config/acmux/config.toml`.
    ///
    /// Returns `Default` if the file does not exist or the config dir
    /// cannot be determined (e.g. no HOME in containers).
    pub fn load() -> Result<Self> {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return Ok(Self::default()),
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        crate::paths::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Structural validation: weight sum, duplicate account ids.
    pub fn validate(&self) -> Result<(), AppError> {
        self.scoring.validate()?;
        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            if !seen.insert(&account.id) {
                return Err(AppError::DuplicateAccount(account.id.clone()));
            }
        }
        Ok(())
    }

    pub fn account(&self, id: &AccountId) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| &a.id == id)
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.iter().map(|a| a.id.clone()).collect()
    }
}
