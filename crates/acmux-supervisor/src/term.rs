//! Real-terminal state: raw mode and size queries.

use tracing::debug;

/// Puts the controlling terminal into raw mode and restores the saved
/// termios on drop.
///
/// The guard is held by the top-level driver for the whole supervised
/// run, so consecutive supervisors (across failovers) attach to a
/// terminal in a known state. Restoration also runs on the signal-driven
/// exit paths because those unwind through the driver.
pub struct RawModeGuard {
    saved: Option<nix::sys::termios::Termios>,
}

impl RawModeGuard {
    /// Enter raw mode. Succeeds as a no-op when stdin is not a TTY
    /// (tests, pipes); there is simply nothing to restore.
    pub fn enter() -> Self {
        use nix::sys::termios;
        let saved = match termios::tcgetattr(std::io::stdin()) {
            Ok(orig) => {
                let mut raw = orig.clone();
                termios::cfmakeraw(&mut raw);
                if let Err(e) =
                    termios::tcsetattr(std::io::stdin(), termios::SetArg::TCSANOW, &raw)
                {
                    debug!(error = %e, "failed to enter raw mode");
                    None
                } else {
                    Some(orig)
                }
            }
            Err(e) => {
                debug!(error = %e, "stdin is not a terminal, skipping raw mode");
                None
            }
        };
        Self { saved }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        use nix::sys::termios;
        if let Some(orig) = self.saved.take() {
            let _ = termios::tcsetattr(std::io::stdin(), termios::SetArg::TCSANOW, &orig);
        }
    }
}

/// Current terminal dimensions as (rows, cols), or None when stdout is
/// not a terminal.
pub fn terminal_size() -> Option<(u16, u16)> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ only fills the provided winsize struct.
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut winsize) };
    if rc == 0 && winsize.ws_row > 0 && winsize.ws_col > 0 {
        Some((winsize.ws_row, winsize.ws_col))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_mode_guard_is_safe_without_tty() {
        // Test runners usually have no TTY; enter/drop must be a no-op.
        let guard = RawModeGuard::enter();
        drop(guard);
    }
}
