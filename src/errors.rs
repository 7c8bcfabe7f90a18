//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use axum::http::StatusCode;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The external agent binary could not be found on launch.
    NotInstalled(String),
    /// Any other spawn-level failure, carrying the OS message unmodified.
    Spawn(String),
    /// The agent process exceeded its wall-clock deadline (milliseconds).
    Timeout(u64),
    /// The agent process closed abnormally without a terminal result.
    ProcessExit(Option<i32>),
    /// The agent reported a failed run in its terminal `result` message.
    AgentError(String),
    /// The inbound request could not be turned into a prompt.
    BadRequest(String),
}

impl AppError {
    /// Stable machine-readable code used in error bodies and frames.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::NotInstalled(_) => "installation_error",
            Self::Spawn(_) => "spawn_error",
            Self::Timeout(_) => "timeout_error",
            Self::ProcessExit(_) => "process_error",
            Self::AgentError(_) => "agent_error",
            Self::BadRequest(_) => "invalid_request_error",
        }
    }

    /// HTTP status returned when this error is surfaced as a whole response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotInstalled(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ProcessExit(_) | Self::AgentError(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::Io(_) | Self::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotInstalled(binary) => write!(
                f,
                "not installed: `{binary}` was not found; install the agent CLI and make sure it is on PATH"
            ),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Timeout(ms) => write!(f, "timeout: agent process exceeded {ms} ms"),
            Self::ProcessExit(Some(code)) => {
                write!(f, "process exit: agent process exited with code {code}")
            }
            Self::ProcessExit(None) => {
                write!(f, "process exit: agent process terminated without an exit code")
            }
            Self::AgentError(msg) => write!(f, "agent: {msg}"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
