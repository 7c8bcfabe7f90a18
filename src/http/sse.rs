//! SSE framing and the per-request relay task.
//!
//! The relay pulls [`SessionEvent`]s from the session, runs them through the
//! [`StreamTranslator`], and pushes [`SseFrame`]s to the response body
//! channel. When the body is dropped (client disconnected) the relay kills the
//! session exactly once and stops without emitting anything else.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::Event;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::chat::{ChatCompletionChunk, ErrorBody};
use crate::process::{KillSignal, SessionControl, SessionEvent};
use crate::translate::{Emission, StreamTranslator};

/// How long the relay waits for the process to exit after the last frame.
const SETTLE_GRACE: Duration = Duration::from_secs(5);

/// One unit written to the SSE response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// `:ok` comment confirming the connection.
    Ready,
    /// `data: <chunk json>`.
    Chunk(ChatCompletionChunk),
    /// `data: <error json>`.
    Error(ErrorBody),
    /// `data: [DONE]`.
    Done,
}

impl SseFrame {
    /// Convert to an axum SSE event.
    #[must_use]
    pub fn into_event(self) -> Event {
        match self {
            Self::Ready => Event::default().comment("ok"),
            Self::Chunk(chunk) => json_event(&chunk),
            Self::Error(body) => json_event(&body),
            Self::Done => Event::default().data("[DONE]"),
        }
    }
}

impl From<Emission> for SseFrame {
    fn from(emission: Emission) -> Self {
        match emission {
            Emission::Chunk(chunk) => Self::Chunk(chunk),
            Emission::Error(body) => Self::Error(body),
            Emission::Done => Self::Done,
        }
    }
}

fn json_event<T: Serialize>(payload: &T) -> Event {
    Event::default().json_data(payload).unwrap_or_else(|err| {
        warn!(error = %err, "failed to serialize SSE payload");
        Event::default().comment("serialization error")
    })
}

/// Map a frame stream item for `Sse::new`.
#[must_use]
pub fn to_event(frame: SseFrame) -> Result<Event, Infallible> {
    Ok(frame.into_event())
}

/// How a relay ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RelayOutcome {
    /// The translator emitted `[DONE]`.
    Finished,
    /// The client went away first; the session was killed.
    Cancelled,
}

/// Relay one session to one SSE response.
///
/// Sends [`SseFrame::Ready`] first, then translated frames in event order.
pub async fn relay_stream<C: SessionControl>(
    control: &C,
    events: &mut mpsc::Receiver<SessionEvent>,
    mut translator: StreamTranslator,
    frames: mpsc::Sender<SseFrame>,
) -> RelayOutcome {
    if frames.send(SseFrame::Ready).await.is_err() {
        return cancel(control, translator.id());
    }

    loop {
        let emissions = tokio::select! {
            biased;

            () = frames.closed() => return cancel(control, translator.id()),

            event = events.recv() => match event {
                Some(event) => translator.on_event(&event),
                None => translator.on_disconnect(),
            },
        };

        for emission in emissions {
            if frames.send(SseFrame::from(emission)).await.is_err() {
                return cancel(control, translator.id());
            }
        }

        if translator.is_finished() {
            debug!(id = translator.id(), phase = ?translator.state().phase(), "stream finished");
            return RelayOutcome::Finished;
        }
    }
}

/// Wait briefly for the session to close after the last frame.
pub async fn settle(events: &mut mpsc::Receiver<SessionEvent>) {
    let drained = tokio::time::timeout(SETTLE_GRACE, async {
        while events.recv().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        debug!("agent process still running after the final frame");
    }
}

fn cancel<C: SessionControl>(control: &C, id: &str) -> RelayOutcome {
    info!(id, "client disconnected, cancelling agent run");
    control.kill(KillSignal::Terminate);
    RelayOutcome::Cancelled
}
