//! Turn flow: answers, tool rounds, extraction, gating, and history repair.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use helm_engine::helm_providers::scripted::ScriptStep;
use helm_engine::helm_tools::builtins::{read_file_tool, write_file_tool};
use helm_engine::helm_tools::RiskLevel;
use helm_engine::helm_types::{
    Message, OperatingMode, Role, StreamEvent, ToolCall, Transcript,
};
use helm_engine::recovery::INTERRUPTED_BEFORE_EXECUTION;
use helm_engine::{
    CompletionReason, EngineConfig, MALFORMED_TOOL_CALL, TurnError, TurnEvent, TurnOutcome,
    TurnStatus, extract_tool_calls,
};

use crate::common::{
    CallLog, call, conversation, drain, guarded_tool, input, recording_tool, registry,
    scripted, tool_results,
};

#[tokio::test]
async fn plain_text_answer_completes_turn() {
    let adapter = scripted([ScriptStep::deltas(["Hel", "lo"])]);
    let mut conv = conversation(&adapter, registry([]));
    let mut rx = conv.subscribe();

    let outcome = conv.run_turn(input("hi"), &CancellationToken::new()).await;

    let TurnOutcome::Completed(done) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(done.text, "Hello");
    assert_eq!(done.reason, CompletionReason::Answered);

    let roles: Vec<Role> = conv.transcript().iter().map(Message::role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);

    let finished: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            TurnEvent::TurnFinished(status) => Some(status),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![TurnStatus::Completed]);
}

#[tokio::test]
async fn tool_results_are_fed_back_to_the_model() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls("Looking.", vec![call("c1", "lookup", json!({"q": "x"}))]),
        ScriptStep::text("Found it."),
    ]);
    let mut conv = conversation(&adapter, registry([recording_tool("lookup", &log)]));

    let outcome = conv.run_turn(input("find x"), &CancellationToken::new()).await;

    assert_eq!(outcome.text(), Some("Found it."));
    assert_eq!(log.ids(), vec!["c1"]);

    let requests = adapter.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1].messages;
    assert_eq!(second.len(), 3);
    assert_eq!(second[1].tool_calls().len(), 1);
    assert_eq!(second[1].content(), "Looking.");
    assert_eq!(second[2].tool_call_id(), Some("c1"));
    assert_eq!(second[2].content(), "ran lookup");
    assert!(requests.iter().all(|request| request.tools_enabled()));
}

#[tokio::test]
async fn duplicate_calls_run_once() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls(
            "",
            vec![
                call("c1", "lookup", json!({"q": 1})),
                call("c1", "lookup", json!({"q": 2})),
                call("c2", "lookup", json!({"q": 1})),
                call("c3", "lookup", json!({"q": 3})),
            ],
        ),
        ScriptStep::text("done"),
    ]);
    let mut conv = conversation(&adapter, registry([recording_tool("lookup", &log)]));

    conv.run_turn(input("go"), &CancellationToken::new()).await;

    assert_eq!(log.ids(), vec!["c1", "c3"]);
    let answered: Vec<String> = tool_results(&conv)
        .into_iter()
        .map(|result| result.tool_call_id)
        .collect();
    assert_eq!(answered, vec!["c1", "c3"]);
}

#[tokio::test]
async fn subscribe_uses_configured_capacity() {
    let adapter = scripted([ScriptStep::deltas(["a", "b", "c", "d"])]);
    let mut config = EngineConfig::default();
    config.turn.event_channel_capacity = 2;
    let mut conv = conversation(&adapter, registry([])).with_config(config);
    let mut rx = conv.subscribe();

    conv.run_turn(input("hi"), &CancellationToken::new()).await;

    // Events past the buffer are dropped rather than blocking the turn.
    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], TurnEvent::TextDelta(text) if text == "a"));
}

#[tokio::test]
async fn structured_and_text_copies_of_a_call_run_once() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::events(vec![
            Ok(StreamEvent::TextDelta(
                "<read_file><path>a</path></read_file>".into(),
            )),
            Ok(StreamEvent::ToolCalls(vec![call(
                "toolu_1",
                "read_file",
                json!({"path": "a"}),
            )])),
            Ok(StreamEvent::Done),
        ]),
        ScriptStep::text("done"),
    ]);
    let mut conv = conversation(&adapter, registry([recording_tool("read_file", &log)]));

    let outcome = conv.run_turn(input("read a"), &CancellationToken::new()).await;

    assert_eq!(outcome.text(), Some("done"));
    assert_eq!(log.ids(), vec!["toolu_1"]);
    let assistant = &conv.transcript().as_slice()[1];
    assert_eq!(assistant.tool_calls().len(), 1);
    let results = tool_results(&conv);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id, "toolu_1");
}

#[tokio::test]
async fn text_tool_calls_are_executed_and_stripped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();
    let adapter = scripted([
        ScriptStep::text("Reading now.\n<read_file><path>notes.txt</path><limit>1</limit></read_file>"),
        ScriptStep::text("The first line is alpha."),
    ]);
    let mut conv = conversation(&adapter, registry([read_file_tool().unwrap()]))
        .with_working_dir(dir.path());

    let outcome = conv.run_turn(input("read it"), &CancellationToken::new()).await;
    assert!(matches!(outcome, TurnOutcome::Completed(_)));

    let assistant = &conv.transcript().as_slice()[1];
    assert_eq!(assistant.content(), "Reading now.");
    let calls = assistant.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "read_file");
    assert_eq!(calls[0].arguments, json!({"path": "notes.txt", "limit": 1}));

    let results = tool_results(&conv);
    assert_eq!(results.len(), 1);
    assert!(!results[0].is_error);
    assert_eq!(results[0].content, "alpha");
}

#[tokio::test]
async fn malformed_syntax_becomes_error_result_with_empty_display() {
    let text = "<function=write_file>";
    let names = vec!["write_file".to_string()];
    let expected = extract_tool_calls(text, Vec::new(), &names)
        .malformed
        .expect("function shorthand is malformed");

    let adapter = scripted([ScriptStep::text(text), ScriptStep::text("Sorry, retrying.")]);
    let mut conv = conversation(&adapter, registry([write_file_tool().unwrap()]));

    let outcome = conv.run_turn(input("write"), &CancellationToken::new()).await;
    assert_eq!(outcome.text(), Some("Sorry, retrying."));

    let assistant = &conv.transcript().as_slice()[1];
    assert_eq!(assistant.content(), "");
    assert_eq!(assistant.tool_calls()[0].name, MALFORMED_TOOL_CALL);

    let results = tool_results(&conv);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_error);
    assert_eq!(results[0].content, expected);
}

#[tokio::test]
async fn malformed_response_clears_streamed_text() {
    let adapter = scripted([
        ScriptStep::deltas(["Writing ", "<function=write_file>"]),
        ScriptStep::text("Retrying."),
    ]);
    let mut conv = conversation(&adapter, registry([write_file_tool().unwrap()]));
    let mut rx = conv.subscribe();

    conv.run_turn(input("write"), &CancellationToken::new()).await;

    let events = drain(&mut rx);
    let fragment = events
        .iter()
        .position(|e| matches!(e, TurnEvent::TextDelta(text) if text == "<function=write_file>"))
        .expect("raw fragment is streamed");
    let first_text = events
        .iter()
        .position(|e| matches!(e, TurnEvent::AssistantText(_)))
        .expect("final text follows");
    assert!(fragment < first_text);
    assert!(matches!(&events[first_text], TurnEvent::AssistantText(text) if text.is_empty()));
}

#[tokio::test]
async fn well_formed_write_file_call_is_extracted() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = scripted([
        ScriptStep::text("<write_file><path>out/test.txt</path><content>hello</content></write_file>"),
        ScriptStep::text("Written."),
    ]);
    let mut conv = conversation(&adapter, registry([write_file_tool().unwrap()]))
        .with_mode(OperatingMode::AutoAccept)
        .with_working_dir(dir.path());

    conv.run_turn(input("write"), &CancellationToken::new()).await;

    let call = &conv.transcript().as_slice()[1].tool_calls()[0];
    assert_eq!(call.name, "write_file");
    assert_eq!(call.arguments, json!({"path": "out/test.txt", "content": "hello"}));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out/test.txt")).unwrap(),
        "hello"
    );
}

#[tokio::test]
async fn unknown_tool_is_answered_and_loop_continues() {
    let adapter = scripted([
        ScriptStep::tool_calls("", vec![call("c1", "grep", json!({}))]),
        ScriptStep::text("ok"),
    ]);
    let log = CallLog::default();
    let mut conv = conversation(&adapter, registry([recording_tool("lookup", &log)]));

    let outcome = conv.run_turn(input("go"), &CancellationToken::new()).await;
    assert_eq!(outcome.text(), Some("ok"));

    let results = tool_results(&conv);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_error);
    assert!(results[0].content.contains("Unknown tool: 'grep'"));
    assert!(results[0].content.contains("lookup"));
}

#[tokio::test]
async fn plan_mode_rejects_file_mutating_tools() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls(
            "",
            vec![
                call("c1", "edit", json!({"path": "a"})),
                call("c2", "lookup", json!({})),
            ],
        ),
        ScriptStep::text("planned"),
    ]);
    let mut conv = conversation(
        &adapter,
        registry([guarded_tool("edit", &log), recording_tool("lookup", &log)]),
    )
    .with_mode(OperatingMode::Plan);

    conv.run_turn(input("plan it"), &CancellationToken::new()).await;

    assert_eq!(log.ids(), vec!["c2"]);
    let results = tool_results(&conv);
    let edit = results.iter().find(|r| r.tool_call_id == "c1").unwrap();
    assert!(edit.is_error);
    assert!(edit.content.contains("plan mode"));
}

#[tokio::test]
async fn auto_accept_runs_medium_risk_but_not_high_risk() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls(
            "",
            vec![call("c1", "edit", json!({})), call("c2", "shell", json!({}))],
        ),
        ScriptStep::text("unreachable"),
    ]);
    let shell = recording_tool("shell", &log)
        .requires_approval(true)
        .with_risk(RiskLevel::High);
    let mut conv = conversation(&adapter, registry([guarded_tool("edit", &log), shell]))
        .with_mode(OperatingMode::AutoAccept);

    let outcome = conv.run_turn(input("go"), &CancellationToken::new()).await;

    assert_eq!(log.ids(), vec!["c1"]);
    let TurnOutcome::Completed(done) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(done.reason, CompletionReason::ConfirmationUnavailable);
}

#[tokio::test]
async fn round_limit_fails_the_turn() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls("", vec![call("c1", "lookup", json!({"n": 1}))]),
        ScriptStep::tool_calls("", vec![call("c2", "lookup", json!({"n": 2}))]),
        ScriptStep::text("never sent"),
    ]);
    let mut config = EngineConfig::default();
    config.turn.max_rounds = 2;
    let mut conv =
        conversation(&adapter, registry([recording_tool("lookup", &log)])).with_config(config);

    let outcome = conv.run_turn(input("loop"), &CancellationToken::new()).await;

    let TurnOutcome::Failed(failure) = outcome else {
        panic!("expected failure");
    };
    assert!(matches!(failure.error, TurnError::RoundLimitExceeded { limit: 2 }));
    assert!(failure.message.as_str().starts_with("[Round limit]"));
    assert_eq!(adapter.requests().len(), 2);
    assert_eq!(adapter.remaining(), 1);
    assert_eq!(tool_results(&conv).len(), 2);
}

#[tokio::test]
async fn dangling_calls_are_answered_before_next_user_message() {
    let mut transcript = Transcript::new();
    transcript.push(Message::try_user("earlier").unwrap());
    transcript.push(Message::tool_use(
        "",
        ToolCall::new("d1", "lookup", json!({})),
        [ToolCall::new("d2", "lookup", json!({"n": 2}))],
    ));
    transcript.push(Message::tool_result(
        helm_engine::helm_types::ToolResult::success("d1", "lookup", "ran lookup"),
    ));

    let adapter = scripted([ScriptStep::text("hello again")]);
    let log = CallLog::default();
    let mut conv = conversation(&adapter, registry([recording_tool("lookup", &log)]))
        .with_transcript(transcript);

    conv.run_turn(input("again"), &CancellationToken::new()).await;

    let messages = &adapter.requests()[0].messages;
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[3].tool_call_id(), Some("d2"));
    assert_eq!(messages[3].content(), INTERRUPTED_BEFORE_EXECUTION);
    assert_eq!(messages[4].content(), "again");
    assert!(log.ids().is_empty());
    assert!(conv.transcript().unanswered_tool_calls().is_empty());
}
