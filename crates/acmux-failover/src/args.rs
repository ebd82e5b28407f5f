//! Child argument rewriting around `--resume`.

/// Remove any existing resume flag (`--resume <id>`, `--resume=<id>`,
/// `-r <id>`) from `args`.
pub fn strip_resume(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        if arg == "--resume" || arg == "-r" {
            // Flag value follows, unless the user put the flag last.
            if iter.peek().is_some_and(|v| !v.starts_with('-')) {
                iter.next();
            }
            continue;
        }
        if arg.starts_with("--resume=") {
            continue;
        }
        out.push(arg.clone());
    }
    out
}

/// Replace any resume flag in `args` with `--resume <session_id>`.
pub fn with_resume(args: &[String], session_id: &str) -> Vec<String> {
    let mut out = strip_resume(args);
    out.push("--resume".to_string());
    out.push(session_id.to_string());
    out
}
