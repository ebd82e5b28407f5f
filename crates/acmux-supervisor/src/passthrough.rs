//! Non-PTY fallback: run the child with inherited stdio.
//!
//! Used when the PTY layer cannot be set up (no controlling terminal,
//! platform limits on PTY allocation). No output inspection and no
//! overlay keys are available in this mode; the child simply owns the
//! terminal until it exits.

use anyhow::Context;
use tracing::warn;

/// Run `command` directly, wiring the parent's stdio through. Returns
/// the child's exit code, or 1 when the child died to a signal.
pub async fn run_passthrough(
    command: &str,
    args: &[String],
    env: &[(String, String)],
) -> anyhow::Result<i32> {
    let mut cmd = tokio::process::Command::new(command);
    cmd.args(args)
        .stdin(std::process::Stdio::inherit())
        .stdout(std::process::Stdio::inherit())
        .stderr(std::process::Stdio::inherit());
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {command} in passthrough mode"))?;
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed waiting for {command}"))?;

    Ok(status.code().unwrap_or_else(|| {
        warn!(command, "child terminated by signal");
        1
    }))
}
