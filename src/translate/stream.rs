//! Streaming translator: session events in, chunk frames out.
//!
//! | Event                                      | Emits                                   |
//! |--------------------------------------------|-----------------------------------------|
//! | first text delta                           | chunk with `role` + text                |
//! | later text delta                           | chunk with text                         |
//! | text block start after any text            | chunk with `"\n\n"`                     |
//! | tool-use start / argument delta            | nothing (tool index advances)           |
//! | `message_start` or assistant turn          | nothing (model label updated)           |
//! | successful `result`                        | terminal chunk with usage, then `Done`  |
//! | failed `result`, session error, bad exit   | error object, then `Done`               |
//! | exit code 0 without `result`               | `Done`                                  |
//!
//! After `Done` every further event is ignored.

use chrono::Utc;
use tracing::debug;

use super::{completion_id, Emission, TranslationState};
use crate::models::chat::{ChatCompletionChunk, Delta, ErrorBody, Usage, FINISH_STOP, ROLE_ASSISTANT};
use crate::process::SessionEvent;
use crate::stream::message::ResultMessage;
use crate::stream::AgentMessage;
use crate::AppError;

/// Separator inserted between consecutive text blocks.
pub const BLOCK_SEPARATOR: &str = "\n\n";

/// Per-request streaming state machine.
#[derive(Debug, Clone)]
pub struct StreamTranslator {
    id: String,
    created: i64,
    state: TranslationState,
}

impl StreamTranslator {
    /// Translator for `request_id`, labelled with the requested model until
    /// the agent reports its own.
    #[must_use]
    pub fn new(request_id: &str, requested_model: Option<&str>) -> Self {
        Self {
            id: completion_id(request_id),
            created: Utc::now().timestamp(),
            state: TranslationState::new(requested_model),
        }
    }

    /// Frame identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read-only view of the state.
    #[must_use]
    pub fn state(&self) -> &TranslationState {
        &self.state
    }

    /// Whether `Done` has been emitted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Advance the state machine by one event.
    pub fn on_event(&mut self, event: &SessionEvent) -> Vec<Emission> {
        if self.state.is_finished() {
            return Vec::new();
        }
        match event {
            SessionEvent::Message(message) => self.on_message(message),
            SessionEvent::Raw(_) => Vec::new(),
            SessionEvent::Error(err) => self.fail(err),
            SessionEvent::Closed { exit_code: Some(0) } => {
                debug!(id = %self.id, "agent exited cleanly without a result");
                self.state.complete();
                vec![Emission::Done]
            }
            SessionEvent::Closed { exit_code } => self.fail(&AppError::ProcessExit(*exit_code)),
        }
    }

    /// Handle the event channel ending without a `Closed` event.
    pub fn on_disconnect(&mut self) -> Vec<Emission> {
        self.on_event(&SessionEvent::Closed { exit_code: None })
    }

    fn on_message(&mut self, message: &AgentMessage) -> Vec<Emission> {
        if let Some(text) = message.text_delta() {
            let with_role = self.state.record_text();
            return vec![Emission::Chunk(self.text_chunk(text, with_role))];
        }

        if message.is_text_block_start() {
            if self.state.emitted_text() {
                return vec![Emission::Chunk(self.text_chunk(BLOCK_SEPARATOR, false))];
            }
            return Vec::new();
        }

        if message.is_tool_use_start() {
            self.state.record_tool_block();
            return Vec::new();
        }

        if let Some(model) = message.reported_model() {
            self.state.observe_model(model);
            return Vec::new();
        }

        if let Some(result) = message.as_result() {
            return self.on_result(result);
        }

        Vec::new()
    }

    fn on_result(&mut self, result: &ResultMessage) -> Vec<Emission> {
        if result.is_error {
            let reason = match (result.result.as_deref(), result.subtype.as_deref()) {
                (Some(text), _) if !text.is_empty() => text.to_owned(),
                (_, Some(subtype)) => subtype.to_owned(),
                _ => "agent reported an error".to_owned(),
            };
            return self.fail(&AppError::AgentError(reason));
        }

        let mut emissions = Vec::with_capacity(3);

        // No partial messages were streamed: deliver the final text whole.
        if !self.state.emitted_text() && !result.text().is_empty() {
            let with_role = self.state.record_text();
            emissions.push(Emission::Chunk(self.text_chunk(result.text(), with_role)));
        }

        let mut terminal =
            ChatCompletionChunk::new(&self.id, self.created, self.state.model(), Delta::default());
        if let Some(choice) = terminal.choices.first_mut() {
            choice.finish_reason = Some(FINISH_STOP.to_owned());
        }
        terminal.usage = Some(Usage::new(
            result.usage.input_tokens,
            result.usage.output_tokens,
        ));

        self.state.complete();
        emissions.push(Emission::Chunk(terminal));
        emissions.push(Emission::Done);
        emissions
    }

    fn fail(&mut self, err: &AppError) -> Vec<Emission> {
        debug!(id = %self.id, error = %err, "translation failed");
        self.state.fail();
        vec![Emission::Error(ErrorBody::from(err)), Emission::Done]
    }

    fn text_chunk(&self, text: &str, with_role: bool) -> ChatCompletionChunk {
        ChatCompletionChunk::new(
            &self.id,
            self.created,
            self.state.model(),
            Delta {
                role: with_role.then(|| ROLE_ASSISTANT.to_owned()),
                content: Some(text.to_owned()),
            },
        )
    }
}
