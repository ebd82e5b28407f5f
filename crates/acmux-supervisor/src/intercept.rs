//! Keystroke interception for the two reserved overlay keys.
//!
//! All input bytes normally flow straight to the child. The only buffering
//! happens when the input so far is a proper prefix of a reserved escape
//! sequence; an ambiguous prefix is held no longer than
//! [`ESCAPE_FLUSH_TIMEOUT`] before being flushed to the child, so a lone
//! Esc keypress still arrives promptly.

use std::time::{Duration, Instant};

/// F9: show the status overlay.
const STATUS_SEQ: &[u8] = b"\x1b[20~";
/// F10: show the account-switch overlay.
const SWITCH_SEQ: &[u8] = b"\x1b[21~";

/// How long an ambiguous partial escape sequence may sit in the buffer.
pub const ESCAPE_FLUSH_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayTrigger {
    Status,
    Switch,
}

#[derive(Debug, PartialEq, Eq)]
pub enum InterceptAction {
    /// Bytes to forward to the child.
    Forward(Vec<u8>),
    Trigger(OverlayTrigger),
}

/// Pure recognizer for the reserved sequences.
///
/// Owned by the supervisor loop; `feed` on every stdin chunk,
/// `flush_expired` whenever the disambiguation deadline passes.
#[derive(Default)]
pub struct EscapeMatcher {
    pending: Vec<u8>,
    pending_since: Option<Instant>,
}

impl EscapeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process incoming bytes, producing forwards and overlay triggers in
    /// input order.
    pub fn feed(&mut self, bytes: &[u8], now: Instant) -> Vec<InterceptAction> {
        self.pending.extend_from_slice(bytes);
        let mut actions = Vec::new();
        let mut forward = Vec::new();

        loop {
            if self.pending.is_empty() {
                self.pending_since = None;
                break;
            }
            if let Some(trigger) = self.try_match_full() {
                if !forward.is_empty() {
                    actions.push(InterceptAction::Forward(std::mem::take(&mut forward)));
                }
                actions.push(InterceptAction::Trigger(trigger));
                continue;
            }
            if self.is_prefix_of_reserved() {
                // Ambiguous: hold, but never longer than the flush
                // timeout. The window restarts on every read that still
                // leaves the prefix ambiguous.
                self.pending_since = Some(now);
                break;
            }
            // Not reserved: release the leading byte and re-examine the
            // rest (it may start a reserved sequence).
            forward.push(self.pending.remove(0));
        }

        if !forward.is_empty() {
            actions.push(InterceptAction::Forward(forward));
        }
        actions
    }

    /// Flush an ambiguous prefix whose disambiguation window has expired.
    /// Returns the bytes to forward to the child, if any.
    pub fn flush_expired(&mut self, now: Instant) -> Option<Vec<u8>> {
        let since = self.pending_since?;
        if now.duration_since(since) < ESCAPE_FLUSH_TIMEOUT {
            return None;
        }
        self.pending_since = None;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// When the currently held prefix must be flushed, if one is held.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending_since.map(|t| t + ESCAPE_FLUSH_TIMEOUT)
    }

    fn try_match_full(&mut self) -> Option<OverlayTrigger> {
        for (seq, trigger) in [
            (STATUS_SEQ, OverlayTrigger::Status),
            (SWITCH_SEQ, OverlayTrigger::Switch),
        ] {
            if self.pending.starts_with(seq) {
                self.pending.drain(..seq.len());
                return Some(trigger);
            }
        }
        None
    }

    fn is_prefix_of_reserved(&self) -> bool {
        [STATUS_SEQ, SWITCH_SEQ]
            .iter()
            .any(|seq| seq.starts_with(&self.pending) && self.pending.len() < seq.len())
    }
}
