//! Integration tests for `ProcessSession` against scripted fake agents.
//!
//! Covers event order, exit codes, the timeout watchdog, idempotent kill,
//! SIGKILL escalation, output suppression after kill,
//! the not-installed error, and the exact argument vector.

use std::time::Duration;

use serial_test::serial;

use agent_bridge::models::ModelSelector;
use agent_bridge::process::{
    KillSignal, ProcessSession, SessionControl, SessionEvent, SessionOptions,
};
use agent_bridge::stream::AgentMessage;
use agent_bridge::AppError;

use super::test_helpers::{
    drain, emit_lines, spawn_config, success_lines, write_script, EVENT_DEADLINE,
};

const LONG: Duration = Duration::from_secs(30);

fn is_error(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Error(_))
}

// ── Normal runs ──────────────────────────────────────────────

#[tokio::test]
#[serial]
async fn scripted_output_is_classified_in_order_then_closed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = write_script(temp.path(), "agent", &emit_lines(&success_lines(), 0));

    let (session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &SessionOptions::default())
            .expect("spawn");
    let events = drain(&mut events).await;

    let kinds: Vec<_> = events
        .iter()
        .map(|event| match event {
            SessionEvent::Message(message) => message.kind(),
            SessionEvent::Raw(_) => "raw",
            SessionEvent::Error(_) => "error",
            SessionEvent::Closed { .. } => "closed",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "init",
            "stream_event",
            "stream_event",
            "stream_event",
            "assistant",
            "result",
            "closed",
        ]
    );
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Closed { exit_code: Some(0) })
    );
    assert_eq!(session.exit_code(), Some(Some(0)));
    assert!(!session.is_alive());
    assert!(!session.kill(KillSignal::Terminate), "kill after exit is a no-op");
}

#[tokio::test]
#[serial]
async fn non_json_stdout_and_stderr_are_not_protocol_data() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = concat!(
        "echo 'starting up'\n",
        "echo '{\"type\":\"system\",\"subtype\":\"init\"}' >&2\n",
        "echo '{\"type\":\"result\",\"result\":\"ok\"}'",
    );
    let agent = write_script(temp.path(), "agent", body);

    let (_session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &SessionOptions::default())
            .expect("spawn");
    let events = drain(&mut events).await;

    assert_eq!(events.len(), 3, "{events:?}");
    assert_eq!(events[0], SessionEvent::Raw("starting up".to_owned()));
    assert!(matches!(
        events[1],
        SessionEvent::Message(AgentMessage::Result(_))
    ));
    assert_eq!(events[2], SessionEvent::Closed { exit_code: Some(0) });
}

#[tokio::test]
#[serial]
async fn stdin_is_closed_at_spawn() {
    let temp = tempfile::tempdir().expect("tempdir");
    // `cat` only returns once stdin reaches end of file.
    let body = "cat > /dev/null\necho '{\"type\":\"result\",\"result\":\"eof\"}'";
    let agent = write_script(temp.path(), "agent", body);

    let (_session, mut events) = ProcessSession::start(
        &spawn_config(&agent, Duration::from_secs(5)),
        "hi",
        &SessionOptions::default(),
    )
    .expect("spawn");
    let events = drain(&mut events).await;

    assert!(!events.iter().any(is_error), "{events:?}");
    assert_eq!(events.last(), Some(&SessionEvent::Closed { exit_code: Some(0) }));
}

#[tokio::test]
#[serial]
async fn working_directory_is_applied() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workdir = temp.path().join("work");
    std::fs::create_dir(&workdir).expect("mkdir");
    let agent = write_script(temp.path(), "agent", "pwd");

    let options = SessionOptions {
        working_dir: Some(workdir.clone()),
        ..SessionOptions::default()
    };
    let (_session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &options).expect("spawn");
    let events = drain(&mut events).await;

    let canonical = workdir.canonicalize().expect("canonical");
    let SessionEvent::Raw(printed) = &events[0] else {
        panic!("expected raw pwd output, got {events:?}");
    };
    assert_eq!(
        std::path::Path::new(printed).canonicalize().expect("canonical"),
        canonical
    );
}

// ── Failures ─────────────────────────────────────────────────

#[tokio::test]
#[serial]
async fn nonzero_exit_is_reported_on_close() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = write_script(temp.path(), "agent", "echo 'boom' >&2\nexit 1");

    let (session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &SessionOptions::default())
            .expect("spawn");
    let events = drain(&mut events).await;

    assert_eq!(events, vec![SessionEvent::Closed { exit_code: Some(1) }]);
    assert_eq!(session.exit_code(), Some(Some(1)));
}

#[tokio::test]
#[serial]
async fn timeout_kills_and_reports_exactly_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = write_script(temp.path(), "agent", "exec sleep 30");

    let options = SessionOptions {
        timeout: Some(Duration::from_millis(200)),
        ..SessionOptions::default()
    };
    let (session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &options).expect("spawn");
    let events = drain(&mut events).await;

    assert_eq!(
        events,
        vec![
            SessionEvent::Error(AppError::Timeout(200)),
            SessionEvent::Closed { exit_code: None },
        ]
    );
    assert!(!session.is_alive());
    assert!(!session.kill(KillSignal::Kill), "already killed by the watchdog");
}

#[tokio::test]
#[serial]
async fn missing_binary_is_not_installed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("no-such-agent");

    let err = ProcessSession::start(&spawn_config(&missing, LONG), "hi", &SessionOptions::default())
        .map(|_| ())
        .expect_err("spawn must fail");

    assert_eq!(
        err,
        AppError::NotInstalled(missing.to_string_lossy().into_owned())
    );
}

#[tokio::test]
#[serial]
async fn missing_working_directory_is_a_spawn_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = write_script(temp.path(), "agent", "exit 0");
    let options = SessionOptions {
        working_dir: Some(temp.path().join("absent")),
        ..SessionOptions::default()
    };

    let err = ProcessSession::start(&spawn_config(&agent, LONG), "hi", &options)
        .map(|_| ())
        .expect_err("spawn must fail");

    assert!(matches!(err, AppError::Spawn(_)), "{err:?}");
}

// ── Kill ─────────────────────────────────────────────────────

#[tokio::test]
#[serial]
async fn kill_is_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = write_script(temp.path(), "agent", "exec sleep 30");

    let (session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &SessionOptions::default())
            .expect("spawn");
    assert!(session.is_alive());

    assert!(session.kill(KillSignal::Terminate));
    assert!(!session.kill(KillSignal::Terminate));
    assert!(!session.kill(KillSignal::Kill));
    assert!(!session.is_alive());

    let events = drain(&mut events).await;
    assert_eq!(events, vec![SessionEvent::Closed { exit_code: None }]);
}

#[tokio::test]
#[serial]
async fn output_after_kill_is_not_forwarded() {
    let temp = tempfile::tempdir().expect("tempdir");
    let body = concat!(
        "trap 'echo \"{\\\"type\\\":\\\"result\\\",\\\"result\\\":\\\"late\\\"}\"; exit 0' TERM\n",
        "echo '{\"type\":\"system\",\"subtype\":\"init\"}'\n",
        "while true; do sleep 0.1; done",
    );
    let agent = write_script(temp.path(), "agent", body);

    let (session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &SessionOptions::default())
            .expect("spawn");

    let first = tokio::time::timeout(EVENT_DEADLINE, events.recv())
        .await
        .expect("first event in time")
        .expect("first event");
    assert!(
        matches!(first, SessionEvent::Message(AgentMessage::Init(_))),
        "{first:?}"
    );

    assert!(session.kill(KillSignal::Terminate));
    let rest = drain(&mut events).await;
    assert_eq!(rest, vec![SessionEvent::Closed { exit_code: Some(0) }]);
}

#[tokio::test]
#[serial]
async fn timeout_escalates_when_termination_is_ignored() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = write_script(temp.path(), "agent", "trap '' TERM\nexec sleep 20");

    let options = SessionOptions {
        timeout: Some(Duration::from_millis(200)),
        ..SessionOptions::default()
    };
    let started = std::time::Instant::now();
    let (session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &options).expect("spawn");
    let events = drain(&mut events).await;

    assert_eq!(
        events,
        vec![
            SessionEvent::Error(AppError::Timeout(200)),
            SessionEvent::Closed { exit_code: None },
        ]
    );
    assert!(started.elapsed() < Duration::from_secs(8), "{:?}", started.elapsed());
    assert_eq!(session.exit_code(), Some(None));
}

#[tokio::test]
#[serial]
async fn kill_escalates_when_termination_is_ignored() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = write_script(temp.path(), "agent", "trap '' TERM\nexec sleep 20");

    let (session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &SessionOptions::default())
            .expect("spawn");
    // Give the shell time to install the trap before signalling it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(session.kill(KillSignal::Terminate));

    let events = drain(&mut events).await;
    assert_eq!(events, vec![SessionEvent::Closed { exit_code: None }]);
}

#[tokio::test]
#[serial]
async fn dropping_the_session_terminates_the_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let agent = write_script(temp.path(), "agent", "exec sleep 30");

    let (session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), "hi", &SessionOptions::default())
            .expect("spawn");
    drop(session);

    let events = drain(&mut events).await;
    assert_eq!(events, vec![SessionEvent::Closed { exit_code: None }]);
}

// ── Arguments ────────────────────────────────────────────────

#[tokio::test]
#[serial]
async fn agent_receives_the_fixed_argument_vector() {
    let temp = tempfile::tempdir().expect("tempdir");
    let capture = temp.path().join("argv.txt");
    let body = format!("printf '%s\\n' \"$@\" > '{}'", capture.display());
    let agent = write_script(temp.path(), "agent", &body);

    let options = SessionOptions {
        model: ModelSelector::Haiku,
        session_id: Some("0b4c2f0e-5d55-4b2a-9a53-0c2f8c1c5f11".to_owned()),
        ..SessionOptions::default()
    };
    let prompt = "say \"hi\" $(whoami) ; exit 3";
    let (_session, mut events) =
        ProcessSession::start(&spawn_config(&agent, LONG), prompt, &options).expect("spawn");
    let events = drain(&mut events).await;
    assert_eq!(events, vec![SessionEvent::Closed { exit_code: Some(0) }]);

    let argv = std::fs::read_to_string(&capture).expect("captured argv");
    let argv: Vec<&str> = argv.lines().collect();
    assert_eq!(
        argv,
        vec![
            "--print",
            "--output-format",
            "stream-json",
            "--verbose",
            "--include-partial-messages",
            "--model",
            "haiku",
            "--no-session-persistence",
            "--append-system-prompt",
            "test guidance",
            "--session-id",
            "0b4c2f0e-5d55-4b2a-9a53-0c2f8c1c5f11",
            "--",
            prompt,
        ]
    );
}
