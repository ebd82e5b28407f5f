//! The supervisor task: owns one PTY child and all per-session state,
//! driven entirely by channels.
//!
//! The top-level run loop talks to it through [`SupervisorHandle`]
//! commands and [`SupervisorEvent`]s. Stdin is read by a single thread
//! owned by the caller; its receiver is loaned to each supervisor in
//! turn and handed back when the session ends, so consecutive sessions
//! (across account switches) share one reader.

use crate::detect::RateLimitWatch;
use crate::intercept::{EscapeMatcher, InterceptAction};
use crate::pty::PtySession;
use crate::term::terminal_size;
use acmux_core::AppError;
use anyhow::Context;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use crate::intercept::OverlayTrigger;

const EVENT_CHANNEL_CAPACITY: usize = 32;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Everything needed to launch one supervised session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub rate_limit_markers: Vec<String>,
}

/// Where stdin bytes go after escape matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRoute {
    /// Normal operation: forward to the child.
    Child,
    /// An overlay is open: emit bytes as [`SupervisorEvent::Input`].
    Driver,
}

#[derive(Debug)]
pub enum SupervisorCommand {
    /// Inject bytes into the child, bypassing escape matching.
    Write(Vec<u8>),
    Resize { rows: u16, cols: u16 },
    /// Terminate the child; the session ends without an `Exited` event.
    Kill,
    /// Stop relaying child output to stdout, buffering it instead.
    PauseOutput,
    /// Resume relaying and flush everything buffered while paused.
    ResumeOutput,
    SetInputRoute(InputRoute),
}

#[derive(Debug, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A rate-limit marker appeared in the output. Fired at most once.
    RateLimited,
    /// The user pressed a reserved overlay key.
    Overlay(OverlayTrigger),
    /// Stdin bytes, while input is routed to the driver.
    Input(Vec<u8>),
    /// The child exited on its own with this code.
    Exited(i32),
}

/// Returned when the PTY could not be set up at all. Carries the stdin
/// receiver back so the caller can fall back to passthrough mode.
pub struct SpawnFailure {
    pub error: AppError,
    pub stdin_rx: mpsc::Receiver<Vec<u8>>,
}

impl std::fmt::Debug for SpawnFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnFailure")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Cloneable command side of a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    pub async fn send(&self, cmd: SupervisorCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            debug!("supervisor task already finished, command dropped");
        }
    }
}

/// A running supervised session.
pub struct Supervisor {
    handle: SupervisorHandle,
    events: mpsc::Receiver<SupervisorEvent>,
    join: tokio::task::JoinHandle<(Option<i32>, mpsc::Receiver<Vec<u8>>)>,
}

impl Supervisor {
    /// Spawn the child in a PTY sized to the current terminal and start
    /// the supervisor task.
    pub fn start(
        spec: SessionSpec,
        stdin_rx: mpsc::Receiver<Vec<u8>>,
    ) -> Result<Self, SpawnFailure> {
        let size = terminal_size();
        let (pty, output_rx, exit_rx) =
            match PtySession::spawn(&spec.command, &spec.args, &spec.env, size) {
                Ok(parts) => parts,
                Err(error) => return Err(SpawnFailure { error, stdin_rx }),
            };

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let task = SupervisorTask {
            pty,
            output_rx,
            exit_rx,
            stdin_rx,
            cmd_rx,
            event_tx,
            watch: RateLimitWatch::new(spec.rate_limit_markers),
            matcher: EscapeMatcher::new(),
            route: InputRoute::Child,
            paused: false,
            pause_buffer: Vec::new(),
            kill_requested: false,
        };
        let join = tokio::spawn(task.run());

        Ok(Self {
            handle: SupervisorHandle { cmd_tx },
            events: event_rx,
            join,
        })
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    pub async fn next_event(&mut self) -> Option<SupervisorEvent> {
        self.events.recv().await
    }

    /// Wait for the session to end. Returns the child's exit code (None
    /// when the child was killed via [`SupervisorCommand::Kill`]) and
    /// hands the stdin receiver back for the next session.
    pub async fn join(self) -> anyhow::Result<(Option<i32>, mpsc::Receiver<Vec<u8>>)> {
        drop(self.events);
        self.join.await.context("supervisor task panicked")
    }
}

struct SupervisorTask {
    pty: PtySession,
    output_rx: mpsc::Receiver<Vec<u8>>,
    exit_rx: tokio::sync::oneshot::Receiver<i32>,
    stdin_rx: mpsc::Receiver<Vec<u8>>,
    cmd_rx: mpsc::Receiver<SupervisorCommand>,
    event_tx: mpsc::Sender<SupervisorEvent>,
    watch: RateLimitWatch,
    matcher: EscapeMatcher,
    route: InputRoute,
    paused: bool,
    pause_buffer: Vec<u8>,
    kill_requested: bool,
}

impl SupervisorTask {
    async fn run(mut self) -> (Option<i32>, mpsc::Receiver<Vec<u8>>) {
        let mut stdout = tokio::io::stdout();
        let mut winch = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
            .map_err(|e| debug!(error = %e, "SIGWINCH unavailable"))
            .ok();
        let mut stdin_open = true;
        let mut output_open = true;

        let exit_code = loop {
            let flush_deadline = self.matcher.deadline();
            tokio::select! {
                code = &mut self.exit_rx => {
                    break code.ok();
                }
                chunk = self.output_rx.recv(), if output_open => {
                    match chunk {
                        Some(chunk) => self.relay_output(&mut stdout, &chunk).await,
                        // PTY EOF. Stop polling the closed channel and
                        // keep waiting until the child is reaped so we
                        // report its real exit code.
                        None => output_open = false,
                    }
                }
                bytes = self.stdin_rx.recv(), if stdin_open => {
                    match bytes {
                        Some(bytes) => self.handle_input(&bytes).await,
                        None => stdin_open = false,
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, &mut stdout).await,
                        None => {
                            // Driver dropped us: tear the child down.
                            self.kill_requested = true;
                            self.pty.kill();
                        }
                    }
                }
                _ = recv_signal(winch.as_mut()) => {
                    if let Some((rows, cols)) = terminal_size() {
                        self.pty.resize(rows, cols);
                    }
                }
                _ = sleep_until_opt(flush_deadline) => {
                    if let Some(bytes) = self.matcher.flush_expired(Instant::now()) {
                        self.deliver_input(bytes).await;
                    }
                }
            }
        };

        // The child is gone; drain whatever output the reader thread
        // still holds so the final screen state reaches the terminal.
        while let Some(chunk) = self.output_rx.recv().await {
            self.relay_output(&mut stdout, &chunk).await;
        }
        if self.paused && !self.pause_buffer.is_empty() {
            let _ = stdout.write_all(&self.pause_buffer).await;
            let _ = stdout.flush().await;
        }

        if self.kill_requested {
            (None, self.stdin_rx)
        } else {
            let code = exit_code.unwrap_or(-1);
            let _ = self.event_tx.send(SupervisorEvent::Exited(code)).await;
            (Some(code), self.stdin_rx)
        }
    }

    async fn relay_output(&mut self, stdout: &mut tokio::io::Stdout, chunk: &[u8]) {
        if self.watch.feed(chunk) {
            let _ = self.event_tx.send(SupervisorEvent::RateLimited).await;
        }
        if self.paused {
            self.pause_buffer.extend_from_slice(chunk);
            return;
        }
        if let Err(e) = stdout.write_all(chunk).await {
            warn!(error = %e, "failed writing child output to stdout");
            return;
        }
        let _ = stdout.flush().await;
    }

    async fn handle_input(&mut self, bytes: &[u8]) {
        for action in self.matcher.feed(bytes, Instant::now()) {
            match action {
                InterceptAction::Forward(bytes) => self.deliver_input(bytes).await,
                InterceptAction::Trigger(trigger) => {
                    let _ = self.event_tx.send(SupervisorEvent::Overlay(trigger)).await;
                }
            }
        }
    }

    async fn deliver_input(&mut self, bytes: Vec<u8>) {
        match self.route {
            InputRoute::Child => {
                if let Err(e) = self.pty.write_all(&bytes) {
                    warn!(error = %e, "failed writing to child PTY");
                }
            }
            InputRoute::Driver => {
                let _ = self.event_tx.send(SupervisorEvent::Input(bytes)).await;
            }
        }
    }

    async fn handle_command(&mut self, cmd: SupervisorCommand, stdout: &mut tokio::io::Stdout) {
        match cmd {
            SupervisorCommand::Write(bytes) => {
                if let Err(e) = self.pty.write_all(&bytes) {
                    warn!(error = %e, "failed writing to child PTY");
                }
            }
            SupervisorCommand::Resize { rows, cols } => self.pty.resize(rows, cols),
            SupervisorCommand::Kill => {
                self.kill_requested = true;
                self.pty.kill();
            }
            SupervisorCommand::PauseOutput => {
                self.paused = true;
            }
            SupervisorCommand::ResumeOutput => {
                self.paused = false;
                if !self.pause_buffer.is_empty() {
                    let buffered = std::mem::take(&mut self.pause_buffer);
                    if let Err(e) = stdout.write_all(&buffered).await {
                        warn!(error = %e, "failed flushing paused output");
                    }
                    let _ = stdout.flush().await;
                }
            }
            SupervisorCommand::SetInputRoute(route) => {
                self.route = route;
            }
        }
    }
}

async fn recv_signal(signal: Option<&mut tokio::signal::unix::Signal>) {
    match signal {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec_for(script: &str) -> SessionSpec {
        SessionSpec {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: Vec::new(),
            rate_limit_markers: vec!["usage limit reached".to_string()],
        }
    }

    fn stdin_pair() -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
        mpsc::channel(16)
    }

    async fn wait_for(
        sup: &mut Supervisor,
        want: impl Fn(&SupervisorEvent) -> bool,
    ) -> SupervisorEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let ev = sup.next_event().await.expect("event stream open");
                if want(&ev) {
                    return ev;
                }
            }
        })
        .await
        .expect("expected event before timeout")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_exit_event_carries_child_code() {
        let (_tx, rx) = stdin_pair();
        let mut sup = Supervisor::start(spec_for("exit 3"), rx).expect("start");
        let ev = wait_for(&mut sup, |e| matches!(e, SupervisorEvent::Exited(_))).await;
        assert_eq!(ev, SupervisorEvent::Exited(3));
        let (code, _rx) = sup.join().await.expect("join");
        assert_eq!(code, Some(3));
    }

    /// Total CPU time this process has consumed so far.
    fn process_cpu_time() -> Duration {
        let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
        // SAFETY: getrusage only fills the provided rusage struct.
        let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
        assert_eq!(rc, 0);
        let usage = unsafe { usage.assume_init() };
        let tv = |t: libc::timeval| Duration::new(t.tv_sec as u64, t.tv_usec as u32 * 1000);
        tv(usage.ru_utime) + tv(usage.ru_stime)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pty_eof_before_exit_stays_idle() {
        let (_tx, rx) = stdin_pair();
        // The child closes its PTY fds, lingers, then exits: the output
        // channel closes long before the exit code arrives, and the
        // supervisor must wait without burning CPU.
        let mut sup = Supervisor::start(
            spec_for("exec 0<&- 1>&- 2>&-; sleep 2; exit 9"),
            rx,
        )
        .expect("start");

        let cpu_before = process_cpu_time();
        let ev = wait_for(&mut sup, |e| matches!(e, SupervisorEvent::Exited(_))).await;
        let cpu_burned = process_cpu_time() - cpu_before;

        assert_eq!(ev, SupervisorEvent::Exited(9));
        assert!(
            cpu_burned < Duration::from_millis(750),
            "supervisor burned {cpu_burned:?} CPU while waiting for a child with a closed PTY"
        );
        let (code, _rx) = sup.join().await.expect("join");
        assert_eq!(code, Some(9));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rate_limit_marker_emits_event() {
        let (_tx, rx) = stdin_pair();
        let mut sup =
            Supervisor::start(spec_for("printf 'usage limit reached\\n'; sleep 2"), rx)
                .expect("start");
        let ev = wait_for(&mut sup, |e| matches!(e, SupervisorEvent::RateLimited)).await;
        assert_eq!(ev, SupervisorEvent::RateLimited);
        sup.handle().send(SupervisorCommand::Kill).await;
        let (code, _rx) = sup.join().await.expect("join");
        assert_eq!(code, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kill_suppresses_exit_event() {
        let (_tx, rx) = stdin_pair();
        let mut sup = Supervisor::start(spec_for("sleep 30"), rx).expect("start");
        sup.handle().send(SupervisorCommand::Kill).await;
        // No Exited event: the channel closes without one.
        let ev = tokio::time::timeout(Duration::from_secs(10), sup.next_event())
            .await
            .expect("task ends after kill");
        assert_eq!(ev, None);
        let (code, _rx) = sup.join().await.expect("join");
        assert_eq!(code, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overlay_key_becomes_event_not_child_input() {
        let (tx, rx) = stdin_pair();
        let mut sup = Supervisor::start(spec_for("sleep 30"), rx).expect("start");
        tx.send(b"\x1b[20~".to_vec()).await.unwrap();
        let ev = wait_for(&mut sup, |e| matches!(e, SupervisorEvent::Overlay(_))).await;
        assert_eq!(ev, SupervisorEvent::Overlay(OverlayTrigger::Status));
        sup.handle().send(SupervisorCommand::Kill).await;
        let _ = sup.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_input_routes_to_driver_while_overlay_open() {
        let (tx, rx) = stdin_pair();
        let mut sup = Supervisor::start(spec_for("sleep 30"), rx).expect("start");
        sup.handle()
            .send(SupervisorCommand::SetInputRoute(InputRoute::Driver))
            .await;
        tx.send(b"j".to_vec()).await.unwrap();
        let ev = wait_for(&mut sup, |e| matches!(e, SupervisorEvent::Input(_))).await;
        assert_eq!(ev, SupervisorEvent::Input(b"j".to_vec()));
        sup.handle().send(SupervisorCommand::Kill).await;
        let _ = sup.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stdin_receiver_returned_after_session() {
        let (tx, rx) = stdin_pair();
        let sup = Supervisor::start(spec_for("exit 0"), rx).expect("start");
        let (_code, mut rx) = sup.join().await.expect("join");
        // The receiver still works for the next session.
        tx.send(b"next".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await, Some(b"next".to_vec()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_failure_returns_stdin_receiver() {
        let (_tx, rx) = stdin_pair();
        let spec = SessionSpec {
            command: "/definitely/not/a/binary".to_string(),
            args: Vec::new(),
            env: Vec::new(),
            rate_limit_markers: Vec::new(),
        };
        match Supervisor::start(spec, rx) {
            Err(SpawnFailure { error, stdin_rx: _ }) => {
                assert!(matches!(error, AppError::PtySpawnFailed { .. }));
            }
            Ok(_) => panic!("expected spawn failure"),
        }
    }
}
