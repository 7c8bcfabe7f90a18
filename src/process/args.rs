//! Argument vector for the agent CLI.
//!
//! The prompt travels as the final discrete argument after `--`; nothing is
//! ever passed through a shell, so prompt content cannot be interpreted as
//! shell syntax or as a CLI flag.

use tracing::debug;
use uuid::Uuid;

use crate::models::ModelSelector;

/// Build the full argument vector for one agent run.
///
/// `session_id` is forwarded only when it is a valid UUID, which is the only
/// form the CLI accepts for `--session-id`.
#[must_use]
pub fn build_args(
    prompt: &str,
    model: ModelSelector,
    session_id: Option<&str>,
    tool_guidance: &str,
    skip_permissions: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["--print".into()];
    if skip_permissions {
        args.push("--dangerously-skip-permissions".into());
    }
    args.extend(
        [
            "--output-format",
            "stream-json",
            "--verbose",
            "--include-partial-messages",
            "--model",
            model.as_cli_arg(),
            "--no-session-persistence",
            "--append-system-prompt",
            tool_guidance,
        ]
        .map(String::from),
    );

    if let Some(id) = session_id.map(str::trim).filter(|id| !id.is_empty()) {
        match Uuid::parse_str(id) {
            Ok(uuid) => {
                args.push("--session-id".into());
                args.push(uuid.hyphenated().to_string());
            }
            Err(_) => debug!(session_id = id, "correlation id is not a uuid, not forwarded"),
        }
    }

    args.push("--".into());
    args.push(prompt.to_owned());
    args
}
