//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Tool-name-mapping guidance appended to the agent's system prompt.
///
/// OpenAI-style clients describe tools with their own names; the agent only
/// knows its built-in tool set and must not try to call the client's tools.
pub const DEFAULT_TOOL_GUIDANCE: &str = "You are answering through an OpenAI-compatible API bridge. \
Tools described by the caller (for example `read_file`, `write_file`, `exec`, `web_search`) are \
not available to you directly. Use your built-in equivalents instead: Read for reading files, \
Write or Edit for changing files, Bash for running commands, WebSearch and WebFetch for the web. \
Never emit tool calls addressed to the caller's tool names.";

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    3456
}

fn default_cli_binary() -> String {
    "claude".into()
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_max_line_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_event_buffer() -> usize {
    64
}

fn default_tool_guidance() -> String {
    DEFAULT_TOOL_GUIDANCE.into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP port for the chat-completions endpoint.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Agent CLI binary (name resolved through `PATH`, or an absolute path).
    #[serde(default = "default_cli_binary")]
    pub cli_binary: String,
    /// Default wall-clock budget for one agent run, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Longest stdout line accepted from the agent before it is discarded.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Capacity of the per-request event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Text appended to the agent's system prompt on every run.
    #[serde(default = "default_tool_guidance")]
    pub tool_guidance: String,
    /// Pass the CLI's permission-bypass flag so tools run without prompts.
    #[serde(default)]
    pub skip_permissions: bool,
    /// Header lines whose sections are removed from inbound system prompts.
    #[serde(default)]
    pub strip_sections: Vec<String>,
    /// Working directory for agent processes when a request names none.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            cli_binary: default_cli_binary(),
            timeout_ms: default_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
            event_buffer: default_event_buffer(),
            tool_guidance: default_tool_guidance(),
            skip_permissions: false,
            strip_sections: Vec::new(),
            working_dir: None,
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default per-run timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate field ranges and normalize the working directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid field.
    pub fn validate(&mut self) -> Result<()> {
        if self.cli_binary.trim().is_empty() {
            return Err(AppError::Config("cli_binary must not be empty".into()));
        }

        if self.timeout_ms == 0 {
            return Err(AppError::Config(
                "timeout_ms must be greater than zero".into(),
            ));
        }

        if self.event_buffer == 0 {
            return Err(AppError::Config(
                "event_buffer must be greater than zero".into(),
            ));
        }

        if self.max_line_bytes < 1024 {
            return Err(AppError::Config(
                "max_line_bytes must be at least 1024".into(),
            ));
        }

        if let Some(dir) = &self.working_dir {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("working_dir invalid: {err}")))?;
            self.working_dir = Some(canonical);
        }

        Ok(())
    }
}
