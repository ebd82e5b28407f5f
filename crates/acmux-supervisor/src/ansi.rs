//! Minimal ANSI escape stripping for marker matching.
//!
//! The child draws with colors and cursor movement; marker detection must
//! see plain text. This handles CSI sequences, OSC strings (BEL or ST
//! terminated), and bare two-byte escapes. Unrecognized input passes
//! through untouched.

/// Remove ANSI escape sequences from `input`.
pub fn strip_ansi(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != 0x1b {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        // ESC at end of input: drop it.
        let Some(&next) = bytes.get(i + 1) else {
            break;
        };
        match next {
            b'[' => {
                // CSI: parameters then one final byte in 0x40..=0x7E.
                i += 2;
                while i < bytes.len() && !(0x40..=0x7e).contains(&bytes[i]) {
                    i += 1;
                }
                i += 1;
            }
            b']' => {
                // OSC: terminated by BEL or ESC \.
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            _ => {
                // Two-byte escape (ESC c, ESC =, ...).
                i += 2;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(strip_ansi("hello world"), "hello world");
    }

    #[test]
    fn test_strips_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m text"), "red text");
    }

    #[test]
    fn test_strips_cursor_movement() {
        assert_eq!(strip_ansi("\x1b[2J\x1b[1;1Hcleared"), "cleared");
    }

    #[test]
    fn test_strips_osc_title_bel() {
        assert_eq!(strip_ansi("\x1b]0;my title\x07after"), "after");
    }

    #[test]
    fn test_strips_osc_title_st() {
        assert_eq!(strip_ansi("\x1b]0;my title\x1b\\after"), "after");
    }

    #[test]
    fn test_marker_survives_styling() {
        let styled = "\x1b[1m\x1b[33mClaude usage limit reached\x1b[0m";
        assert_eq!(strip_ansi(styled), "Claude usage limit reached");
    }

    #[test]
    fn test_trailing_escape_dropped() {
        assert_eq!(strip_ansi("text\x1b"), "text");
    }
}
