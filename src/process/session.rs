//! Agent process spawner and driver.
//!
//! [`ProcessSession::start`] launches the agent CLI with:
//! - a fixed argument vector from [`build_args`](super::build_args), passed as
//!   discrete arguments (never through a shell);
//! - stdin closed immediately (the prompt travels as an argument);
//! - stdout routed through [`NdjsonCodec`] and [`classify`];
//! - stderr routed to the `debug` log only;
//! - `kill_on_drop(true)` as a last-resort cleanup.
//!
//! Once the session is killed, stdout is still drained but no longer
//! forwarded. A process that survives `KILL_GRACE` after a termination
//! request is killed outright.
//!
//! The returned receiver yields [`SessionEvent`]s in stdout order and always
//! ends with exactly one [`SessionEvent::Closed`].

use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{build_args, KillSignal, SessionControl, SessionEvent, SessionOptions, SpawnConfig};
use crate::stream::{classify, Frame, NdjsonCodec};
use crate::{AppError, Result};

/// How long stdout may stay open after the process has exited.
///
/// Grandchildren that inherited the pipe can keep it open indefinitely.
const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long a signalled process may take to exit before it gets `SIGKILL`.
const KILL_GRACE: Duration = Duration::from_secs(2);

// ── Lifecycle flags ───────────────────────────────────────────────────────────

/// State shared between a [`ProcessSession`] and its driver task.
#[derive(Debug, Default)]
struct Lifecycle {
    killed: AtomicBool,
    exit: OnceLock<Option<i32>>,
}

impl Lifecycle {
    /// Mark the session killed; `true` only for the first caller.
    fn mark_killed(&self) -> bool {
        !self.killed.swap(true, Ordering::SeqCst)
    }

    fn mark_exited(&self, code: Option<i32>) {
        // First writer wins; the driver observes exit once.
        let _ = self.exit.set(code);
    }

    fn has_exited(&self) -> bool {
        self.exit.get().is_some()
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

// ── Session handle ────────────────────────────────────────────────────────────

/// Handle to one running agent process.
///
/// Dropping a handle whose process is still alive terminates the process.
#[derive(Debug)]
pub struct ProcessSession {
    request_id: String,
    pid: Option<u32>,
    deadline: Instant,
    lifecycle: Arc<Lifecycle>,
    control: mpsc::UnboundedSender<KillSignal>,
}

impl ProcessSession {
    /// Spawn the agent CLI for `prompt` and start its driver task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `AppError::NotInstalled`: the binary does not exist.
    /// - `AppError::Spawn`: the working directory is missing, or any other
    ///   OS spawn failure (message passed through unmodified).
    pub fn start(
        config: &SpawnConfig,
        prompt: &str,
        options: &SessionOptions,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let request_id = Uuid::new_v4().simple().to_string();
        let timeout = options.timeout.unwrap_or(config.default_timeout);
        let working_dir = options
            .working_dir
            .as_ref()
            .or(config.default_working_dir.as_ref());

        let args = build_args(
            prompt,
            options.model,
            options.session_id.as_deref(),
            &config.tool_guidance,
            config.skip_permissions,
        );

        let mut cmd = Command::new(&config.cli_binary);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            // A missing cwd also surfaces as NotFound from spawn; rule it out
            // so NotFound below always means a missing binary.
            if !dir.is_dir() {
                return Err(AppError::Spawn(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|err| match err.kind() {
            ErrorKind::NotFound => AppError::NotInstalled(config.cli_binary.clone()),
            _ => AppError::Spawn(err.to_string()),
        })?;

        // Close the write side immediately.
        drop(child.stdin.take());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

        let pid = child.id();
        let deadline = Instant::now() + timeout;
        let lifecycle = Arc::new(Lifecycle::default());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));

        info!(
            request_id = %request_id,
            pid = pid.unwrap_or(0),
            cli = %config.cli_binary,
            model = options.model.as_cli_arg(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "agent process spawned"
        );

        let driver = Driver {
            child,
            lifecycle: Arc::clone(&lifecycle),
            control: control_rx,
            events: event_tx,
            consumer_gone: false,
            timeout,
            deadline,
        };
        let span = info_span!("agent_session", request_id = request_id.as_str());
        tokio::spawn(
            driver
                .run(stdout, stderr, config.max_line_bytes)
                .instrument(span),
        );

        Ok((
            Self {
                request_id,
                pid,
                deadline,
                lifecycle,
                control: control_tx,
            },
            event_rx,
        ))
    }

    /// Identifier of the request this session serves.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// OS process id at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Instant at which the timeout fires.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// `Some(code)` once the process has exited (`code` is `None` when it
    /// was terminated by a signal); `None` while it is running.
    #[must_use]
    pub fn exit_code(&self) -> Option<Option<i32>> {
        self.lifecycle.exit.get().copied()
    }
}

impl SessionControl for ProcessSession {
    fn kill(&self, signal: KillSignal) -> bool {
        if self.lifecycle.has_exited() || !self.lifecycle.mark_killed() {
            return false;
        }
        info!(request_id = %self.request_id, ?signal, "killing agent process");
        // The driver outlives the process, so the receiver is still open.
        self.control.send(signal).is_ok()
    }

    fn is_alive(&self) -> bool {
        self.pid.is_some() && !self.lifecycle.is_killed() && !self.lifecycle.has_exited()
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.is_alive() {
            debug!(request_id = %self.request_id, "session handle dropped while alive");
            self.kill(KillSignal::Terminate);
        }
    }
}

// ── Driver task ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    /// Waiting for the wall-clock deadline.
    Deadline,
    /// Signalled; waiting for the process to exit before `SIGKILL`.
    Escalate,
    /// Process exited; waiting for stdout to close.
    Drain,
    Off,
}

/// Owns the child process; the only code that signals or reaps it.
struct Driver {
    child: Child,
    lifecycle: Arc<Lifecycle>,
    control: mpsc::UnboundedReceiver<KillSignal>,
    events: mpsc::Sender<SessionEvent>,
    consumer_gone: bool,
    timeout: Duration,
    deadline: Instant,
}

impl Driver {
    async fn run(mut self, stdout: ChildStdout, stderr: ChildStderr, max_line_bytes: usize) {
        let mut frames = FramedRead::new(stdout, NdjsonCodec::new(max_line_bytes));
        let mut stderr_lines = BufReader::new(stderr).lines();

        let timer = tokio::time::sleep_until(self.deadline);
        tokio::pin!(timer);
        let mut timer_state = Timer::Deadline;

        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut control_open = true;
        let mut exit: Option<Option<i32>> = None;

        loop {
            tokio::select! {
                frame = frames.next(), if stdout_open => match frame {
                    Some(Ok(frame)) => self.forward(frame).await,
                    Some(Err(err)) => {
                        warn!(error = %err, "agent stdout read failed");
                        stdout_open = false;
                    }
                    None => {
                        debug!("agent stdout closed");
                        stdout_open = false;
                    }
                },

                line = stderr_lines.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => debug!(stream = "stderr", line = %line, "agent diagnostic"),
                    Ok(None) => stderr_open = false,
                    Err(err) => {
                        debug!(error = %err, "agent stderr read failed");
                        stderr_open = false;
                    }
                },

                signal = self.control.recv(), if control_open => match signal {
                    Some(signal) => {
                        self.deliver(signal);
                        if exit.is_none() && signal != KillSignal::Kill {
                            timer.as_mut().reset(Instant::now() + KILL_GRACE);
                            timer_state = Timer::Escalate;
                        } else if timer_state == Timer::Deadline {
                            timer_state = Timer::Off;
                        }
                    }
                    None => control_open = false,
                },

                status = self.child.wait(), if exit.is_none() => {
                    let code = match status {
                        Ok(status) => status.code(),
                        Err(err) => {
                            warn!(error = %err, "error waiting for agent process");
                            None
                        }
                    };
                    info!(exit_code = ?code, "agent process exited");
                    self.lifecycle.mark_exited(code);
                    exit = Some(code);
                    if stdout_open {
                        timer.as_mut().reset(Instant::now() + EXIT_DRAIN_GRACE);
                        timer_state = Timer::Drain;
                    } else {
                        timer_state = Timer::Off;
                    }
                },

                () = &mut timer, if timer_state != Timer::Off => match timer_state {
                    Timer::Deadline => {
                        self.on_timeout().await;
                        if exit.is_none() {
                            timer.as_mut().reset(Instant::now() + KILL_GRACE);
                            timer_state = Timer::Escalate;
                        } else {
                            timer_state = Timer::Off;
                        }
                    }
                    Timer::Escalate => {
                        if exit.is_none() {
                            self.force_kill();
                        }
                        timer_state = Timer::Off;
                    }
                    Timer::Drain | Timer::Off => {
                        warn!("agent stdout still open after exit, abandoning it");
                        stdout_open = false;
                        timer_state = Timer::Off;
                    }
                },

                else => break,
            }

            if !stdout_open {
                if let Some(exit_code) = exit {
                    self.emit(SessionEvent::Closed { exit_code }).await;
                    break;
                }
            }
        }
    }

    async fn forward(&mut self, frame: Frame) {
        if self.lifecycle.is_killed() {
            debug!(?frame, "agent output after kill, not forwarded");
            return;
        }
        match frame {
            Frame::Json(value) => {
                let message = classify(value);
                debug!(kind = message.kind(), "agent message");
                self.emit(SessionEvent::Message(message)).await;
            }
            Frame::Raw(line) => {
                debug!(raw_line = %line, "agent emitted a non-JSON line");
                self.emit(SessionEvent::Raw(line)).await;
            }
            Frame::Oversized(len) => {
                warn!(bytes = len, "agent line exceeded the length cap, discarded");
            }
        }
    }

    async fn on_timeout(&mut self) {
        if self.lifecycle.has_exited() {
            return;
        }
        let ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(timeout_ms = ms, "agent process timed out");
        if self.lifecycle.mark_killed() {
            self.deliver(KillSignal::Terminate);
        }
        self.emit(SessionEvent::Error(AppError::Timeout(ms))).await;
    }

    fn force_kill(&mut self) {
        let ms = u64::try_from(KILL_GRACE.as_millis()).unwrap_or(u64::MAX);
        warn!(grace_ms = ms, "agent process ignored termination, sending SIGKILL");
        if let Err(err) = self.child.start_kill() {
            warn!(error = %err, "failed to kill agent process");
        }
    }

    fn deliver(&mut self, signal: KillSignal) {
        if let Err(err) = send_signal(&mut self.child, signal) {
            warn!(error = %err, ?signal, "failed to signal agent process");
        }
    }

    async fn emit(&mut self, event: SessionEvent) {
        if self.consumer_gone {
            return;
        }
        if self.events.send(event).await.is_err() {
            debug!("session event receiver dropped, discarding further events");
            self.consumer_gone = true;
        }
    }
}

#[cfg(unix)]
fn send_signal(child: &mut Child, signal: KillSignal) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // `id()` is `None` once the child has been reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|_| std::io::Error::other("pid out of range"))?;
    let signal = match signal {
        KillSignal::Terminate => Signal::SIGTERM,
        KillSignal::Interrupt => Signal::SIGINT,
        KillSignal::Kill => Signal::SIGKILL,
    };
    kill(Pid::from_raw(pid), signal).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _signal: KillSignal) -> std::io::Result<()> {
    child.start_kill()
}
