//! The switch state machine.
//!
//! A session moves through `Running -> (RateLimitPending |
//! ManualSwitchPending) -> Resolving -> Draining -> Switching ->
//! Running`. At most one switch is in flight: further triggers while any
//! non-Running state is active are ignored, so a rate limit firing
//! mid-switch cannot start a second, overlapping switch.

use acmux_core::AccountId;
use tracing::{debug, info};

/// Why a switch was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchReason {
    RateLimit,
    /// User-initiated via the switch overlay. `target` is None when the
    /// user asked for "best available" rather than a specific account.
    Manual { target: Option<AccountId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverState {
    /// Child running normally.
    Running,
    /// A rate-limit marker was seen; waiting for the driver to resolve
    /// a replacement account.
    RateLimitPending,
    /// The user requested a switch from the overlay.
    ManualSwitchPending { target: Option<AccountId> },
    /// Selecting the replacement account.
    Resolving { reason: SwitchReason },
    /// Replacement chosen; shutting the current child down.
    Draining { target: AccountId },
    /// Current child gone; relaunching under the new account.
    Switching { target: AccountId },
}

/// Transition guard around [`FailoverState`]. All methods are pure state
/// bookkeeping; the driver performs the actual work at each step.
#[derive(Debug)]
pub struct FailoverMachine {
    state: FailoverState,
}

impl Default for FailoverMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl FailoverMachine {
    pub fn new() -> Self {
        Self {
            state: FailoverState::Running,
        }
    }

    pub fn state(&self) -> &FailoverState {
        &self.state
    }

    pub fn switch_in_flight(&self) -> bool {
        self.state != FailoverState::Running
    }

    /// A rate-limit marker fired. Returns true when this actually starts
    /// a switch; false when one is already in flight.
    pub fn on_rate_limited(&mut self) -> bool {
        if self.switch_in_flight() {
            debug!(state = ?self.state, "rate limit ignored, switch already in flight");
            return false;
        }
        self.state = FailoverState::RateLimitPending;
        true
    }

    /// The user requested a switch. Returns true when this starts a
    /// switch; false when one is already in flight.
    pub fn on_manual_switch(&mut self, target: Option<AccountId>) -> bool {
        if self.switch_in_flight() {
            debug!(state = ?self.state, "manual switch ignored, switch already in flight");
            return false;
        }
        self.state = FailoverState::ManualSwitchPending { target };
        true
    }

    /// Move from a pending state into Resolving, yielding the reason so
    /// the driver knows which account (if any) was requested.
    pub fn begin_resolving(&mut self) -> Option<SwitchReason> {
        let reason = match std::mem::replace(&mut self.state, FailoverState::Running) {
            FailoverState::RateLimitPending => SwitchReason::RateLimit,
            FailoverState::ManualSwitchPending { target } => SwitchReason::Manual { target },
            other => {
                self.state = other;
                return None;
            }
        };
        self.state = FailoverState::Resolving {
            reason: reason.clone(),
        };
        Some(reason)
    }

    /// A replacement account was selected; start draining.
    pub fn resolved(&mut self, target: AccountId) {
        info!(target = %target, "switching account");
        self.state = FailoverState::Draining { target };
    }

    /// No replacement is available; return to Running so the user can
    /// keep the current session and retry later.
    pub fn resolution_failed(&mut self) {
        self.state = FailoverState::Running;
    }

    /// The old child has exited.
    pub fn drained(&mut self) -> Option<AccountId> {
        match std::mem::replace(&mut self.state, FailoverState::Running) {
            FailoverState::Draining { target } => {
                self.state = FailoverState::Switching {
                    target: target.clone(),
                };
                Some(target)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// The new child is up; back to normal operation.
    pub fn switched(&mut self) {
        self.state = FailoverState::Running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(s: &str) -> AccountId {
        AccountId(s.to_string())
    }

    #[test]
    fn test_full_rate_limit_cycle() {
        let mut m = FailoverMachine::new();
        assert!(!m.switch_in_flight());

        assert!(m.on_rate_limited());
        assert_eq!(m.state(), &FailoverState::RateLimitPending);

        assert_eq!(m.begin_resolving(), Some(SwitchReason::RateLimit));
        m.resolved(acct("b"));
        assert_eq!(m.drained(), Some(acct("b")));
        assert_eq!(
            m.state(),
            &FailoverState::Switching { target: acct("b") }
        );

        m.switched();
        assert_eq!(m.state(), &FailoverState::Running);
        assert!(!m.switch_in_flight());
    }

    #[test]
    fn test_manual_switch_carries_target() {
        let mut m = FailoverMachine::new();
        assert!(m.on_manual_switch(Some(acct("work"))));
        assert_eq!(
            m.begin_resolving(),
            Some(SwitchReason::Manual {
                target: Some(acct("work"))
            })
        );
    }

    #[test]
    fn test_second_trigger_ignored_while_in_flight() {
        let mut m = FailoverMachine::new();
        assert!(m.on_rate_limited());

        // Both trigger kinds are ignored until the switch completes.
        assert!(!m.on_rate_limited());
        assert!(!m.on_manual_switch(None));
        assert_eq!(m.state(), &FailoverState::RateLimitPending);

        m.begin_resolving();
        assert!(!m.on_rate_limited());
    }

    #[test]
    fn test_resolution_failure_returns_to_running() {
        let mut m = FailoverMachine::new();
        m.on_rate_limited();
        m.begin_resolving();
        m.resolution_failed();
        assert_eq!(m.state(), &FailoverState::Running);
        // A new trigger is accepted again.
        assert!(m.on_manual_switch(None));
    }

    #[test]
    fn test_begin_resolving_from_running_is_none() {
        let mut m = FailoverMachine::new();
        assert_eq!(m.begin_resolving(), None);
        assert_eq!(m.state(), &FailoverState::Running);
    }

    #[test]
    fn test_drained_outside_draining_is_none() {
        let mut m = FailoverMachine::new();
        assert_eq!(m.drained(), None);
        assert_eq!(m.state(), &FailoverState::Running);
    }
}
