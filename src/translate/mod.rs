//! Translation of session events into chat-completions output.
//!
//! - `state`: the per-request [`TranslationState`].
//! - `stream`: [`StreamTranslator`], the streaming state machine.
//! - `collect`: [`Collector`], the non-streaming reduction.
//!
//! Both consumers are synchronous and free of I/O; the HTTP layer owns the
//! channel plumbing.

pub mod collect;
pub mod state;
pub mod stream;

use crate::models::chat::{ChatCompletionChunk, ErrorBody};

pub use collect::{collect, Collector};
pub use state::{Phase, TranslationState};
pub use stream::StreamTranslator;

/// Output produced by the streaming translator for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// A `chat.completion.chunk` frame.
    Chunk(ChatCompletionChunk),
    /// An inline error object.
    Error(ErrorBody),
    /// The end-of-stream sentinel.
    Done,
}

/// Build the `chatcmpl-…` identifier shared by a request's frames.
#[must_use]
pub fn completion_id(request_id: &str) -> String {
    format!("chatcmpl-{request_id}")
}
