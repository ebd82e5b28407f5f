//! Account failover: the switch state machine, conversation resume-id
//! discovery, child argument rewriting, and best-effort conversation
//! sync between accounts.

pub mod args;
pub mod resume;
pub mod state;
pub mod sync;

pub use args::{strip_resume, with_resume};
pub use resume::latest_session_id;
pub use state::{FailoverMachine, FailoverState, SwitchReason};
pub use sync::{CommandSync, ConversationSync, NoopSync, sync_best_effort};
