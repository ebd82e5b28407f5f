//! Rate-limit marker detection over the child's output stream.

use crate::ansi::strip_ansi;

/// How much ANSI-stripped output tail to keep for marker matching.
/// Markers are short; a few hundred characters comfortably covers a
/// marker split across reads.
const TAIL_KEEP_CHARS: usize = 512;

/// Watches the output stream for any configured rate-limit marker.
///
/// Fires at most once per session: after the first match the watch stays
/// latched, so buffer churn (redraws repeating the marker) cannot emit a
/// second event.
pub struct RateLimitWatch {
    markers: Vec<String>,
    tail: String,
    detected: bool,
}

impl RateLimitWatch {
    pub fn new(markers: Vec<String>) -> Self {
        Self {
            markers,
            tail: String::new(),
            detected: false,
        }
    }

    /// Feed one output chunk. Returns true exactly once, on the first
    /// marker match of the session.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.detected {
            return false;
        }

        self.tail.push_str(&strip_ansi(&String::from_utf8_lossy(chunk)));
        if self.tail.chars().count() > TAIL_KEEP_CHARS {
            let drop = self.tail.chars().count() - TAIL_KEEP_CHARS;
            self.tail = self.tail.chars().skip(drop).collect();
        }

        if self.markers.iter().any(|m| self.tail.contains(m.as_str())) {
            self.detected = true;
            return true;
        }
        false
    }

    pub fn detected(&self) -> bool {
        self.detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch() -> RateLimitWatch {
        RateLimitWatch::new(vec!["usage limit reached".to_string()])
    }

    #[test]
    fn test_no_match_on_ordinary_output() {
        let mut w = watch();
        assert!(!w.feed(b"compiling crate foo v1.2.3\n"));
        assert!(!w.detected());
    }

    #[test]
    fn test_fires_on_marker() {
        let mut w = watch();
        assert!(w.feed(b"Claude usage limit reached. Try again at 5pm."));
        assert!(w.detected());
    }

    #[test]
    fn test_fires_exactly_once() {
        let mut w = watch();
        assert!(w.feed(b"usage limit reached"));
        // The marker staying in the tail must not re-fire.
        assert!(!w.feed(b"usage limit reached again"));
        assert!(!w.feed(b"more output"));
    }

    #[test]
    fn test_marker_split_across_chunks() {
        let mut w = watch();
        assert!(!w.feed(b"usage limit r"));
        assert!(w.feed(b"eached"));
    }

    #[test]
    fn test_marker_wrapped_in_ansi() {
        let mut w = watch();
        assert!(w.feed(b"\x1b[1;31musage \x1b[0mlimit reached"));
    }

    #[test]
    fn test_tail_is_bounded() {
        let mut w = watch();
        let noise = "x".repeat(10_000);
        w.feed(noise.as_bytes());
        assert!(w.tail.chars().count() <= TAIL_KEEP_CHARS);
        // Detection still works after heavy churn.
        assert!(w.feed(b"usage limit reached"));
    }

    #[test]
    fn test_marker_scrolled_out_of_tail_before_completion() {
        let mut w = watch();
        w.feed(b"usage limit r");
        let noise = "y".repeat(1_000);
        w.feed(noise.as_bytes());
        // The partial prefix was evicted; the suffix alone must not match.
        assert!(!w.feed(b"eached"));
    }
}
