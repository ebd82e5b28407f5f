//! Subprocess supervision: one PTY-backed child per session, output relay
//! with rate-limit detection, keystroke interception for the overlay
//! keys, and a non-PTY passthrough fallback.

pub mod ansi;
pub mod detect;
pub mod intercept;
pub mod passthrough;
pub mod pty;
pub mod supervisor;
pub mod term;

pub use detect::RateLimitWatch;
pub use intercept::{EscapeMatcher, InterceptAction, OverlayTrigger};
pub use passthrough::run_passthrough;
pub use supervisor::{
    InputRoute, SessionSpec, SpawnFailure, Supervisor, SupervisorCommand, SupervisorEvent,
    SupervisorHandle,
};
pub use term::{RawModeGuard, terminal_size};
