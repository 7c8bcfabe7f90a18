//! Request handlers for the OpenAI-compatible endpoints.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, info_span, warn, Instrument, Span};

use super::sse::{relay_stream, settle, to_event, SseFrame};
use super::AppState;
use crate::models::chat::{ChatCompletionRequest, ErrorBody, ModelEntry, ModelList};
use crate::models::ModelSelector;
use crate::process::{ProcessSession, SessionEvent, SessionOptions};
use crate::prompt::messages_to_prompt;
use crate::translate::{collect, Collector, StreamTranslator};
use crate::AppError;

/// Frames buffered between the relay and the response body.
const FRAME_BUFFER: usize = 32;

/// Owner reported by `GET /v1/models`.
const MODEL_OWNER: &str = "anthropic";

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(&AppError::BadRequest(rejection.body_text())),
    };

    let prompt = match messages_to_prompt(&request.messages, &state.config.strip_sections) {
        Ok(prompt) => prompt,
        Err(err) => return error_response(&err),
    };

    let requested = request.model.as_deref();
    let options = SessionOptions {
        model: ModelSelector::resolve(requested.unwrap_or_default()),
        session_id: request.user.clone(),
        working_dir: None,
        timeout: None,
    };

    let (session, events) = match ProcessSession::start(&state.spawn, &prompt, &options) {
        Ok(started) => started,
        Err(err) => return error_response(&err),
    };

    let span = info_span!(
        "chat_completion",
        request_id = session.request_id(),
        stream = request.stream,
        model = options.model.as_cli_arg(),
    );

    if request.stream {
        stream_completion(session, events, requested, span)
    } else {
        complete(session, events, requested)
            .instrument(span)
            .await
    }
}

/// Start the relay task and return the SSE response immediately.
fn stream_completion(
    session: ProcessSession,
    mut events: mpsc::Receiver<SessionEvent>,
    requested_model: Option<&str>,
    span: tracing::Span,
) -> Response {
    let translator = StreamTranslator::new(session.request_id(), requested_model);
    let (tx, rx) = mpsc::channel::<SseFrame>(FRAME_BUFFER);

    tokio::spawn(
        async move {
            let outcome = relay_stream(&session, &mut events, translator, tx).await;
            info!(?outcome, "stream relay ended");
            settle(&mut events).await;
        }
        .instrument(span),
    );

    let stream = ReceiverStream::new(rx).map(to_event);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Run the session to completion and answer with one JSON object.
async fn complete(
    session: ProcessSession,
    mut events: mpsc::Receiver<SessionEvent>,
    requested_model: Option<&str>,
) -> Response {
    let collector = Collector::new(session.request_id(), requested_model);
    let outcome = collect(&mut events, collector).await;

    // The outcome is final; let the process wind down without holding the response.
    tokio::spawn(
        async move {
            settle(&mut events).await;
            drop(session);
        }
        .instrument(Span::current()),
    );

    match outcome {
        Ok(completion) => {
            info!(
                total_tokens = completion.usage.total_tokens,
                "completion finished"
            );
            Json(completion).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// `GET /v1/models`.
pub async fn list_models() -> Json<ModelList> {
    let created = Utc::now().timestamp();
    Json(ModelList {
        object: "list".to_owned(),
        data: ModelSelector::ALL
            .iter()
            .map(|model| ModelEntry {
                id: model.label().to_owned(),
                object: "model".to_owned(),
                owned_by: MODEL_OWNER.to_owned(),
                created,
            })
            .collect(),
    })
}

/// `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "provider": "claude-code-cli",
    }))
}

/// Whole-response error in the OpenAI error envelope.
#[must_use]
pub fn error_response(err: &AppError) -> Response {
    warn!(error = %err, code = err.code(), "request failed");
    (err.status(), Json(ErrorBody::from(err))).into_response()
}
