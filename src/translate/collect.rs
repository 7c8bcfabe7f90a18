//! Non-streaming reduction of a session into one `chat.completion`.

use chrono::Utc;
use tokio::sync::mpsc;

use super::completion_id;
use crate::models::chat::{ChatCompletion, Usage};
use crate::models::normalize_model_label;
use crate::process::SessionEvent;
use crate::stream::AgentMessage;
use crate::{AppError, Result};

/// Accumulates a session's events until it can produce a single response.
#[derive(Debug, Clone)]
pub struct Collector {
    id: String,
    created: i64,
    model: &'static str,
    /// Text of complete assistant turns, used when `result` carries none.
    text: String,
    done: bool,
}

impl Collector {
    /// Collector for `request_id`, labelled with the requested model.
    #[must_use]
    pub fn new(request_id: &str, requested_model: Option<&str>) -> Self {
        Self {
            id: completion_id(request_id),
            created: Utc::now().timestamp(),
            model: normalize_model_label(requested_model),
            text: String::new(),
            done: false,
        }
    }

    /// Feed one event; returns the outcome exactly once, on the terminal event.
    pub fn on_event(&mut self, event: &SessionEvent) -> Option<Result<ChatCompletion>> {
        if self.done {
            return None;
        }
        let outcome = match event {
            SessionEvent::Message(AgentMessage::Assistant(turn)) => {
                if let Some(model) = turn.message.model.as_deref() {
                    self.model = normalize_model_label(Some(model));
                }
                let text = turn.text();
                if !text.is_empty() {
                    if !self.text.is_empty() {
                        self.text.push_str("\n\n");
                    }
                    self.text.push_str(&text);
                }
                return None;
            }
            SessionEvent::Message(AgentMessage::Result(result)) if result.is_error => {
                let reason = result
                    .result
                    .clone()
                    .filter(|text| !text.is_empty())
                    .or_else(|| result.subtype.clone())
                    .unwrap_or_else(|| "agent reported an error".to_owned());
                Err(AppError::AgentError(reason))
            }
            SessionEvent::Message(AgentMessage::Result(result)) => {
                let content = if result.text().is_empty() {
                    std::mem::take(&mut self.text)
                } else {
                    result.text().to_owned()
                };
                let usage = Usage::new(result.usage.input_tokens, result.usage.output_tokens);
                Ok(self.completion(content, usage))
            }
            SessionEvent::Message(_) | SessionEvent::Raw(_) => return None,
            SessionEvent::Error(err) => Err(err.clone()),
            SessionEvent::Closed { exit_code: Some(0) } => {
                let content = std::mem::take(&mut self.text);
                Ok(self.completion(content, Usage::default()))
            }
            SessionEvent::Closed { exit_code } => Err(AppError::ProcessExit(*exit_code)),
        };
        self.done = true;
        Some(outcome)
    }

    fn completion(&self, content: String, usage: Usage) -> ChatCompletion {
        ChatCompletion::new(&self.id, self.created, self.model, content, usage)
    }
}

/// Drain `events` through `collector` until it yields an outcome.
///
/// A channel that ends without a terminal event counts as an abnormal exit.
///
/// # Errors
///
/// Returns the session's timeout, abnormal-exit, or agent error.
pub async fn collect(
    events: &mut mpsc::Receiver<SessionEvent>,
    mut collector: Collector,
) -> Result<ChatCompletion> {
    while let Some(event) = events.recv().await {
        if let Some(outcome) = collector.on_event(&event) {
            return outcome;
        }
    }
    collector
        .on_event(&SessionEvent::Closed { exit_code: None })
        .unwrap_or(Err(AppError::ProcessExit(None)))
}
