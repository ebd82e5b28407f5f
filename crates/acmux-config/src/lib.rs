//! Global configuration for acmux (`~/.config/acmux/config.toml`).

pub mod global;
pub mod paths;

pub use global::{
    AccountConfig, GlobalConfig, ScoringConfig, SupervisorConfig, SyncConfig, UsageSourceConfig,
};
