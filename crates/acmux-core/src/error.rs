use crate::types::AccountId;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("No accounts configured. Add at least one [[accounts]] entry to config.toml")]
    NoAccountsConfigured,

    #[error("Account '{0}' is not configured")]
    AccountNotFound(AccountId),

    #[error("Duplicate account id '{0}' in configuration")]
    DuplicateAccount(AccountId),

    #[error(
        "Scoring weights must sum to 1.0 (session_weight={session_weight}, window_weight={window_weight})"
    )]
    InvalidScoringWeights {
        session_weight: f64,
        window_weight: f64,
    },

    #[error("No eligible account available for selection")]
    NoEligibleAccount,

    #[error("Failed to spawn '{command}' in a PTY: {reason}")]
    PtySpawnFailed { command: String, reason: String },
}
