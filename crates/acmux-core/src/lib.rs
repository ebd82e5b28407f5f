//! Shared types and the error taxonomy for acmux.

pub mod error;
pub mod types;

pub use error::AppError;
pub use types::AccountId;
