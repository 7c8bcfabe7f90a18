//! Unit tests for the streaming translator state machine.
//!
//! Events are built from the same JSON shapes the agent emits, so each test
//! also runs them through the classifier.

use serde_json::{json, Value};

use agent_bridge::models::chat::{ChatCompletionChunk, Delta, FINISH_STOP, ROLE_ASSISTANT};
use agent_bridge::process::SessionEvent;
use agent_bridge::stream::classify;
use agent_bridge::translate::{Emission, Phase, StreamTranslator};
use agent_bridge::AppError;

fn message(value: Value) -> SessionEvent {
    SessionEvent::Message(classify(value))
}

fn text_start(index: u64) -> SessionEvent {
    message(json!({
        "type": "stream_event",
        "event": {"type": "content_block_start", "index": index, "content_block": {"type": "text", "text": ""}},
    }))
}

fn tool_start(index: u64) -> SessionEvent {
    message(json!({
        "type": "stream_event",
        "event": {
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {}},
        },
    }))
}

fn text_delta(index: u64, text: &str) -> SessionEvent {
    message(json!({
        "type": "stream_event",
        "event": {"type": "content_block_delta", "index": index, "delta": {"type": "text_delta", "text": text}},
    }))
}

fn tool_delta(index: u64, json_fragment: &str) -> SessionEvent {
    message(json!({
        "type": "stream_event",
        "event": {
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "input_json_delta", "partial_json": json_fragment},
        },
    }))
}

fn assistant(model: &str, text: &str) -> SessionEvent {
    message(json!({
        "type": "assistant",
        "message": {"model": model, "content": [{"type": "text", "text": text}]},
    }))
}

fn result(text: &str, input: u64, output: u64) -> SessionEvent {
    message(json!({
        "type": "result",
        "subtype": "success",
        "is_error": false,
        "result": text,
        "usage": {"input_tokens": input, "output_tokens": output},
    }))
}

fn run(translator: &mut StreamTranslator, events: &[SessionEvent]) -> Vec<Emission> {
    events
        .iter()
        .flat_map(|event| translator.on_event(event))
        .collect()
}

fn chunks(emissions: &[Emission]) -> Vec<&ChatCompletionChunk> {
    emissions
        .iter()
        .filter_map(|emission| match emission {
            Emission::Chunk(chunk) => Some(chunk),
            _ => None,
        })
        .collect()
}

fn contents(emissions: &[Emission]) -> Vec<&str> {
    chunks(emissions)
        .into_iter()
        .filter_map(ChatCompletionChunk::content)
        .collect()
}

fn done_count(emissions: &[Emission]) -> usize {
    emissions.iter().filter(|e| **e == Emission::Done).count()
}

// ── Text deltas and role marker ──────────────────────────────

#[test]
fn first_delta_carries_role_and_later_deltas_do_not() {
    let mut translator = StreamTranslator::new("req1", Some("gpt-4o"));

    let emissions = run(
        &mut translator,
        &[text_start(0), text_delta(0, "Hel"), text_delta(0, "lo")],
    );

    let chunks = chunks(&emissions);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some(ROLE_ASSISTANT));
    assert_eq!(chunks[0].content(), Some("Hel"));
    assert_eq!(chunks[1].choices[0].delta.role, None);
    assert_eq!(chunks[1].content(), Some("lo"));
    assert_eq!(translator.state().phase(), Phase::Streaming);
}

#[test]
fn chunks_share_id_and_use_chunk_object() {
    let mut translator = StreamTranslator::new("abc", None);

    let emissions = run(&mut translator, &[text_delta(0, "x"), result("x", 1, 1)]);

    for chunk in chunks(&emissions) {
        assert_eq!(chunk.id, "chatcmpl-abc");
        assert_eq!(chunk.object, "chat.completion.chunk");
        assert_eq!(chunk.model, "claude-sonnet-4");
    }
}

// ── Block separators ─────────────────────────────────────────

#[test]
fn separator_is_emitted_between_text_blocks() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[
            text_start(0),
            text_delta(0, "First."),
            text_start(1),
            text_delta(1, "Second."),
        ],
    );

    assert_eq!(contents(&emissions), vec!["First.", "\n\n", "Second."]);
}

#[test]
fn no_separator_before_any_text() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[text_start(0), text_start(1), text_delta(1, "only")],
    );

    assert_eq!(contents(&emissions), vec!["only"]);
}

#[test]
fn separator_follows_tool_block_when_text_preceded_it() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[
            text_start(0),
            text_delta(0, "Let me check."),
            tool_start(1),
            tool_delta(1, "{\"command\":"),
            tool_delta(1, "\"ls\"}"),
            text_start(2),
            text_delta(2, "Done."),
        ],
    );

    assert_eq!(contents(&emissions), vec!["Let me check.", "\n\n", "Done."]);
    assert_eq!(translator.state().tool_blocks(), 1);
}

/// Deltas concatenated without the injected separators equal the source text.
#[test]
fn deltas_reconstruct_the_result_text() {
    let mut translator = StreamTranslator::new("req", None);
    let pieces = ["The ", "answer ", "is ", "42."];

    let mut events = vec![text_start(0)];
    events.extend(pieces.iter().map(|p| text_delta(0, p)));
    events.push(result("The answer is 42.", 3, 4));
    let emissions = run(&mut translator, &events);

    let text: String = contents(&emissions)
        .into_iter()
        .filter(|c| *c != "\n\n")
        .collect();
    assert_eq!(text, "The answer is 42.");
}

// ── Tool events are discarded ────────────────────────────────

#[test]
fn tool_use_events_produce_no_frames() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(&mut translator, &[tool_start(0), tool_delta(0, "{}")]);

    assert!(emissions.is_empty(), "got {emissions:?}");
    assert_eq!(translator.state().phase(), Phase::Idle);
}

#[test]
fn unrelated_messages_produce_no_frames() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[
            message(json!({"type": "system", "subtype": "init", "model": "claude-opus-4"})),
            message(json!({"type": "system", "subtype": "hook_started"})),
            message(json!({"type": "stream_event", "event": {"type": "message_stop"}})),
            SessionEvent::Raw("warning: something".to_owned()),
        ],
    );

    assert!(emissions.is_empty(), "got {emissions:?}");
}

// ── Model tracking ───────────────────────────────────────────

#[test]
fn assistant_turn_updates_model_label() {
    let mut translator = StreamTranslator::new("req", Some("gpt-4o"));

    let emissions = run(
        &mut translator,
        &[
            text_delta(0, "a"),
            assistant("claude-opus-4-1-20250805", "a"),
            text_delta(1, "b"),
        ],
    );

    let chunks = chunks(&emissions);
    assert_eq!(chunks[0].model, "claude-sonnet-4");
    assert_eq!(chunks[1].model, "claude-opus-4");
}

#[test]
fn message_start_model_labels_every_frame() {
    let mut translator = StreamTranslator::new("req", Some("gpt-4o"));

    let emissions = run(
        &mut translator,
        &[
            message(json!({
                "type": "stream_event",
                "event": {"type": "message_start", "message": {"model": "claude-haiku-4-5-20251001"}},
            })),
            text_start(0),
            text_delta(0, "hi"),
            assistant("claude-haiku-4-5-20251001", "hi"),
            result("hi", 1, 1),
        ],
    );

    let models: Vec<&str> = chunks(&emissions)
        .into_iter()
        .map(|c| c.model.as_str())
        .collect();
    assert_eq!(models, vec!["claude-haiku-4", "claude-haiku-4"]);
}

// ── Terminal frames ──────────────────────────────────────────

#[test]
fn successful_result_emits_terminal_chunk_with_usage_then_done() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(&mut translator, &[text_delta(0, "hi"), result("hi", 5, 1)]);

    assert_eq!(emissions.len(), 3);
    let Emission::Chunk(terminal) = &emissions[1] else {
        panic!("expected terminal chunk, got {:?}", emissions[1]);
    };
    assert_eq!(terminal.choices[0].finish_reason.as_deref(), Some(FINISH_STOP));
    assert_eq!(terminal.choices[0].delta.content, None);
    assert_eq!(terminal.choices[0].delta.role, None);
    let usage = terminal.usage.expect("terminal usage");
    assert_eq!(usage.prompt_tokens, 5);
    assert_eq!(usage.completion_tokens, 1);
    assert_eq!(usage.total_tokens, 6);
    assert_eq!(emissions[2], Emission::Done);
    assert_eq!(translator.state().phase(), Phase::Completed);
}

#[test]
fn only_terminal_chunk_carries_usage() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[text_delta(0, "a"), text_delta(0, "b"), result("ab", 1, 2)],
    );

    let with_usage: Vec<_> = chunks(&emissions)
        .into_iter()
        .filter(|c| c.usage.is_some())
        .collect();
    assert_eq!(with_usage.len(), 1);
    assert!(with_usage[0].choices[0].finish_reason.is_some());
}

#[test]
fn result_without_streamed_text_is_delivered_whole() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[assistant("claude-haiku-4-5", "hello"), result("hello", 2, 1)],
    );

    let chunks = chunks(&emissions);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].content(), Some("hello"));
    assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some(ROLE_ASSISTANT));
    assert_eq!(chunks[0].model, "claude-haiku-4");
    assert_eq!(chunks[1].choices[0].delta.role, None);
    assert_eq!(done_count(&emissions), 1);
}

#[test]
fn empty_result_emits_a_terminal_chunk_with_an_empty_delta() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(&mut translator, &[result("", 0, 0)]);

    let chunks = chunks(&emissions);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].choices[0].delta, Delta::default());
    assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some(FINISH_STOP));
    assert_eq!(done_count(&emissions), 1);
}

#[test]
fn clean_exit_without_result_emits_done_only() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[text_delta(0, "partial"), SessionEvent::Closed { exit_code: Some(0) }],
    );

    assert_eq!(emissions.len(), 2);
    assert_eq!(emissions[1], Emission::Done);
    assert_eq!(translator.state().phase(), Phase::Completed);
}

// ── Failures ─────────────────────────────────────────────────

#[test]
fn abnormal_exit_emits_error_then_done() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(&mut translator, &[SessionEvent::Closed { exit_code: Some(1) }]);

    assert_eq!(emissions.len(), 2);
    let Emission::Error(body) = &emissions[0] else {
        panic!("expected error, got {:?}", emissions[0]);
    };
    assert_eq!(body.error.code, "process_error");
    assert!(body.error.message.contains("code 1"), "{}", body.error.message);
    assert_eq!(emissions[1], Emission::Done);
    assert_eq!(translator.state().phase(), Phase::Failed);
}

#[test]
fn timeout_error_emits_one_error_frame_and_no_content() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[
            SessionEvent::Error(AppError::Timeout(50)),
            SessionEvent::Closed { exit_code: None },
        ],
    );

    assert_eq!(emissions.len(), 2);
    let Emission::Error(body) = &emissions[0] else {
        panic!("expected error, got {:?}", emissions[0]);
    };
    assert_eq!(body.error.code, "timeout_error");
    assert_eq!(done_count(&emissions), 1);
}

#[test]
fn error_result_is_reported_as_agent_error() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[message(json!({
            "type": "result",
            "subtype": "error_max_turns",
            "is_error": true,
        }))],
    );

    let Emission::Error(body) = &emissions[0] else {
        panic!("expected error, got {:?}", emissions[0]);
    };
    assert_eq!(body.error.code, "agent_error");
    assert!(body.error.message.contains("error_max_turns"));
    assert_eq!(emissions[1], Emission::Done);
}

#[test]
fn disconnect_is_treated_as_abnormal_close() {
    let mut translator = StreamTranslator::new("req", None);
    translator.on_event(&text_delta(0, "a"));

    let emissions = translator.on_disconnect();

    assert!(matches!(emissions[0], Emission::Error(_)));
    assert_eq!(emissions[1], Emission::Done);
}

// ── Exactly one terminal sentinel ────────────────────────────

#[test]
fn events_after_finish_are_ignored() {
    let mut translator = StreamTranslator::new("req", None);

    let emissions = run(
        &mut translator,
        &[
            text_delta(0, "hi"),
            result("hi", 1, 1),
            text_delta(0, "late"),
            SessionEvent::Error(AppError::Timeout(1)),
            SessionEvent::Closed { exit_code: Some(0) },
        ],
    );

    assert_eq!(done_count(&emissions), 1);
    assert_eq!(emissions.last(), Some(&Emission::Done));
    assert!(translator.is_finished());
}

#[test]
fn every_terminal_path_emits_exactly_one_done() {
    let endings = [
        vec![result("x", 1, 1), SessionEvent::Closed { exit_code: Some(0) }],
        vec![SessionEvent::Closed { exit_code: Some(0) }],
        vec![SessionEvent::Closed { exit_code: Some(2) }],
        vec![SessionEvent::Closed { exit_code: None }],
        vec![
            SessionEvent::Error(AppError::Timeout(10)),
            SessionEvent::Closed { exit_code: None },
        ],
    ];

    for ending in endings {
        let mut translator = StreamTranslator::new("req", None);
        let mut events = vec![text_start(0), text_delta(0, "x")];
        events.extend(ending);
        let emissions = run(&mut translator, &events);
        assert_eq!(done_count(&emissions), 1, "events: {events:?}");
        assert_eq!(emissions.last(), Some(&Emission::Done));
    }
}
