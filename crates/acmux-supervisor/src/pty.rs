//! PTY-backed child process: spawn, stream output, write, resize, kill.

use acmux_core::AppError;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::Read;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// One PTY child. Output arrives on the channel returned by [`spawn`];
/// the exit code arrives on the oneshot once the child is reaped.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    writer: Mutex<Box<dyn std::io::Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl PtySession {
    /// Spawn `command` inside a fresh PTY.
    ///
    /// A spawn failure is reported as [`AppError::PtySpawnFailed`] so the
    /// caller can distinguish "the platform cannot give us a PTY" from a
    /// normal child exit and fall back to passthrough mode.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &[(String, String)],
        size: Option<(u16, u16)>,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>, oneshot::Receiver<i32>), AppError> {
        let (rows, cols) = size.unwrap_or((DEFAULT_ROWS, DEFAULT_COLS));

        let spawn_err = |reason: String| AppError::PtySpawnFailed {
            command: command.to_string(),
            reason,
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_err(format!("openpty failed: {e}")))?;

        let mut builder = CommandBuilder::new(command);
        builder.args(args);
        for (key, value) in env {
            builder.env(key, value);
        }
        if let Ok(cwd) = std::env::current_dir() {
            builder.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| spawn_err(e.to_string()))?;
        let killer = child.clone_killer();

        // Parent keeps only the master side.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_err(format!("failed to clone PTY reader: {e}")))?;

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name("acmux-pty-reader".to_string())
            .spawn(move || {
                let mut buf = [0u8; 8192];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            })
            .map_err(|e| spawn_err(format!("failed to spawn reader thread: {e}")))?;

        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(e) => {
                    debug!(error = %e, "failed waiting for PTY child");
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_err(format!("failed to take PTY writer: {e}")))?;

        Ok((
            Self {
                master: pair.master,
                writer: Mutex::new(writer),
                killer: Mutex::new(killer),
            },
            output_rx,
            exit_rx,
        ))
    }

    pub fn write_all(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("PTY writer poisoned"))?;
        writer.write_all(bytes)?;
        writer.flush()
    }

    pub fn resize(&self, rows: u16, cols: u16) {
        let _ = self.master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        });
    }

    /// Terminate the child. Idempotent; safe to call again after the
    /// child already exited.
    pub fn kill(&self) {
        if let Ok(mut killer) = self.killer.lock() {
            let _ = killer.kill();
        }
    }
}
