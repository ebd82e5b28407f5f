//! Usage snapshots: the quota-source boundary and the short-lived cache.

pub mod cache;
pub mod snapshot;
pub mod source;

pub use cache::UsageCache;
pub use snapshot::AccountUsageSnapshot;
pub use source::{CommandUsageSource, OptimisticUsageSource, UsageSource};
