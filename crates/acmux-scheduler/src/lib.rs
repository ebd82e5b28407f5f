//! Account scheduler: capacity scoring, selection, and the context object
//! owning the usage cache and registry handle.

pub mod context;
pub mod scorer;
pub mod selector;

pub use context::SchedulerContext;
pub use scorer::{ScoredCandidate, score};
pub use selector::{Selection, rank, select};
