//! Agent process sessions.
//!
//! One [`ProcessSession`] owns one spawned agent CLI process for one request.
//! A background driver task wires the process's stdout through the
//! [`NdjsonCodec`](crate::stream::NdjsonCodec) and the classifier, logs
//! stderr, enforces the wall-clock timeout, and reports everything through a
//! bounded [`SessionEvent`] channel.
//!
//! Submodules:
//! - `args`: the fixed argument vector.
//! - `session`: spawning, the driver task, and kill/liveness control.

pub mod args;
pub mod session;

use std::path::PathBuf;
use std::time::Duration;

use crate::config::GlobalConfig;
use crate::models::ModelSelector;
use crate::stream::AgentMessage;
use crate::AppError;

pub use args::build_args;
pub use session::ProcessSession;

/// Events emitted by a session's driver task, in stdout order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A classified stdout line.
    Message(AgentMessage),
    /// A stdout line that was not JSON; diagnostic only.
    Raw(String),
    /// A session-level failure (timeout). Emitted at most once.
    Error(AppError),
    /// The process exited; `None` when it was terminated by a signal.
    Closed {
        /// Exit code, if any.
        exit_code: Option<i32>,
    },
}

/// Signal delivered by [`SessionControl::kill`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum KillSignal {
    /// `SIGTERM`: ask the process to stop.
    #[default]
    Terminate,
    /// `SIGINT`.
    Interrupt,
    /// `SIGKILL`: stop unconditionally.
    Kill,
}

/// Lifecycle control over a running session.
///
/// The SSE relay depends on this trait rather than on [`ProcessSession`] so
/// that cancellation can be exercised without spawning anything.
pub trait SessionControl: Send + Sync {
    /// Send `signal` to the process.
    ///
    /// Idempotent: returns `false` without doing anything when the process was
    /// already killed or has exited; `true` when the signal was dispatched.
    fn kill(&self, signal: KillSignal) -> bool;

    /// Whether the process is running and has not been killed.
    fn is_alive(&self) -> bool;
}

/// Per-request launch options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Model tier.
    pub model: ModelSelector,
    /// Session-correlation id forwarded to the CLI.
    pub session_id: Option<String>,
    /// Working directory; falls back to [`SpawnConfig::default_working_dir`].
    pub working_dir: Option<PathBuf>,
    /// Timeout; falls back to [`SpawnConfig::default_timeout`].
    pub timeout: Option<Duration>,
}

/// Process-wide launch settings shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Agent CLI binary.
    pub cli_binary: String,
    /// Appended system-prompt fragment.
    pub tool_guidance: String,
    /// Whether to pass the permission-bypass flag.
    pub skip_permissions: bool,
    /// Working directory when a request names none.
    pub default_working_dir: Option<PathBuf>,
    /// Timeout when a request names none.
    pub default_timeout: Duration,
    /// Stdout line cap.
    pub max_line_bytes: usize,
    /// Event channel capacity.
    pub event_buffer: usize,
}

impl From<&GlobalConfig> for SpawnConfig {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            cli_binary: config.cli_binary.clone(),
            tool_guidance: config.tool_guidance.clone(),
            skip_permissions: config.skip_permissions,
            default_working_dir: config.working_dir.clone(),
            default_timeout: config.timeout(),
            max_line_bytes: config.max_line_bytes,
            event_buffer: config.event_buffer,
        }
    }
}
