//! Resume-id discovery in the child's conversation store.
//!
//! Conversations live under `<store_root>/projects/<sanitized-cwd>/` as
//! one JSONL file per session, named by session id. "Most recent" is
//! decided by the latest `timestamp` field inside each file, not by file
//! mtime: sync tools and backup restores rewrite mtimes wholesale, which
//! would otherwise resume a stale conversation.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Map a working directory to its conversation-store directory name.
/// Every byte outside `[A-Za-z0-9]` becomes `-`.
pub fn sanitize_project_dir(cwd: &Path) -> String {
    cwd.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Find the session id of the most recently active conversation for
/// `cwd`, or None when the project has no conversations yet.
///
/// Unreadable files and unparseable lines are skipped; a best-effort
/// answer beats aborting a switch over one corrupt record.
pub fn latest_session_id(store_root: &Path, cwd: &Path) -> Option<String> {
    let project_dir = store_root
        .join("projects")
        .join(sanitize_project_dir(cwd));
    let entries = match fs::read_dir(&project_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %project_dir.display(), error = %e, "no conversation store for project");
            return None;
        }
    };

    let mut best: Option<(DateTime<Utc>, String)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(ts) = latest_timestamp_in(&path) else {
            continue;
        };
        // Ties keep the earlier find; in practice ids never collide on
        // the same timestamp.
        if best.as_ref().is_none_or(|(t, _)| ts > *t) {
            best = Some((ts, stem.to_string()));
        }
    }
    best.map(|(_, id)| id)
}

/// Latest `timestamp` field across all records of one JSONL file.
fn latest_timestamp_in(path: &Path) -> Option<DateTime<Utc>> {
    let file = fs::File::open(path).ok()?;
    let mut latest: Option<DateTime<Utc>> = None;
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        let Some(ts) = value
            .get("timestamp")
            .and_then(|t| t.as_str())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        else {
            continue;
        };
        let ts = ts.with_timezone(&Utc);
        if latest.is_none_or(|l| ts > l) {
            latest = Some(ts);
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_session(root: &Path, cwd: &Path, id: &str, timestamps: &[&str]) {
        let dir = root.join("projects").join(sanitize_project_dir(cwd));
        fs::create_dir_all(&dir).unwrap();
        let lines: Vec<String> = timestamps
            .iter()
            .map(|ts| format!(r#"{{"type":"user","timestamp":"{ts}","message":"hi"}}"#))
            .collect();
        fs::write(dir.join(format!("{id}.jsonl")), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_sanitize_project_dir() {
        assert_eq!(
            sanitize_project_dir(&PathBuf::from("/home/user/my.project")),
            "-home-user-my-project"
        );
    }

    #[test]
    fn test_no_store_is_none() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(
            latest_session_id(root.path(), &PathBuf::from("/some/cwd")),
            None
        );
    }

    #[test]
    fn test_picks_latest_internal_timestamp() {
        let root = tempfile::tempdir().unwrap();
        let cwd = PathBuf::from("/work/proj");
        write_session(root.path(), &cwd, "older", &["2026-08-20T10:00:00Z"]);
        write_session(root.path(), &cwd, "newer", &["2026-08-21T09:00:00Z"]);
        assert_eq!(
            latest_session_id(root.path(), &cwd),
            Some("newer".to_string())
        );
    }

    #[test]
    fn test_internal_timestamp_beats_mtime() {
        let root = tempfile::tempdir().unwrap();
        let cwd = PathBuf::from("/work/proj");
        write_session(root.path(), &cwd, "active", &["2026-08-21T12:00:00Z"]);
        // Written afterwards (newer mtime) but internally older, as a
        // sync tool restoring an old conversation would produce.
        write_session(root.path(), &cwd, "restored", &["2026-08-01T08:00:00Z"]);
        assert_eq!(
            latest_session_id(root.path(), &cwd),
            Some("active".to_string())
        );
    }

    #[test]
    fn test_latest_record_within_file_wins() {
        let root = tempfile::tempdir().unwrap();
        let cwd = PathBuf::from("/work/proj");
        write_session(
            root.path(),
            &cwd,
            "long",
            &["2026-08-10T10:00:00Z", "2026-08-22T10:00:00Z"],
        );
        write_session(root.path(), &cwd, "short", &["2026-08-15T10:00:00Z"]);
        assert_eq!(
            latest_session_id(root.path(), &cwd),
            Some("long".to_string())
        );
    }

    #[test]
    fn test_skips_corrupt_lines_and_foreign_files() {
        let root = tempfile::tempdir().unwrap();
        let cwd = PathBuf::from("/work/proj");
        write_session(root.path(), &cwd, "good", &["2026-08-21T12:00:00Z"]);

        let dir = root.path().join("projects").join(sanitize_project_dir(&cwd));
        fs::write(dir.join("broken.jsonl"), "not json at all\n{\"half\":").unwrap();
        fs::write(dir.join("notes.txt"), "ignore me").unwrap();

        assert_eq!(
            latest_session_id(root.path(), &cwd),
            Some("good".to_string())
        );
    }
}
