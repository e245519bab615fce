//! Cancellation during streaming, tool execution, and confirmation.

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use helm_engine::helm_providers::scripted::ScriptStep;
use helm_engine::helm_types::{Message, Role};
use helm_engine::recovery::{CANCELLED_BY_USER, INTERRUPTED_BEFORE_EXECUTION};
use helm_engine::{TurnEvent, TurnOutcome, TurnStatus, confirm, events};

use crate::common::{
    CallLog, blocking_tool, call, conversation, drain, guarded_tool, input, recording_tool,
    registry, scripted, tool_results,
};

fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

#[tokio::test]
async fn cancel_mid_stream_ends_turn_once_without_results() {
    let adapter = scripted([ScriptStep::stall_after("Let me think")]);
    let (sink, mut rx) = events::channel(64);
    let mut conv = conversation(&adapter, registry([])).with_events(sink);
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(30));

    let outcome = tokio::time::timeout(Duration::from_secs(5), conv.run_turn(input("hi"), &cancel))
        .await
        .expect("cancellation is observed promptly");

    assert!(matches!(outcome, TurnOutcome::Cancelled));
    let roles: Vec<Role> = conv.transcript().iter().map(Message::role).collect();
    assert_eq!(roles, vec![Role::User]);
    assert!(tool_results(&conv).is_empty());

    let events = drain(&mut rx);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, TurnEvent::TextDelta(text) if text == "Let me think"))
    );
    let finished: Vec<TurnStatus> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::TurnFinished(status) => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![TurnStatus::Cancelled]);
}

#[tokio::test]
async fn already_cancelled_token_never_calls_the_model() {
    let adapter = scripted([ScriptStep::text("unused")]);
    let mut conv = conversation(&adapter, registry([]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = conv.run_turn(input("hi"), &cancel).await;

    assert!(matches!(outcome, TurnOutcome::Cancelled));
    assert!(adapter.requests().is_empty());
}

#[tokio::test]
async fn cancel_during_tool_records_one_result_and_stops() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls(
            "",
            vec![call("c1", "wait", json!({})), call("c2", "lookup", json!({}))],
        ),
        ScriptStep::text("unused"),
    ]);
    let mut conv = conversation(
        &adapter,
        registry([blocking_tool("wait", &log), recording_tool("lookup", &log)]),
    );
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(50));

    let outcome = tokio::time::timeout(Duration::from_secs(5), conv.run_turn(input("go"), &cancel))
        .await
        .expect("tool execution is interrupted");

    assert!(matches!(outcome, TurnOutcome::Cancelled));
    assert_eq!(log.ids(), vec!["c1"]);
    let results = tool_results(&conv);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id, "c1");
    assert_eq!(results[0].content, CANCELLED_BY_USER);
    assert_eq!(adapter.requests().len(), 1);

    // The next turn answers the call that never started.
    adapter.push(ScriptStep::text("resumed"));
    let outcome = conv.run_turn(input("continue"), &CancellationToken::new()).await;
    assert!(matches!(outcome, TurnOutcome::Completed(_)));
    let repaired = tool_results(&conv);
    assert_eq!(repaired[1].tool_call_id, "c2");
    assert_eq!(repaired[1].content, INTERRUPTED_BEFORE_EXECUTION);
}

#[tokio::test]
async fn cancel_while_awaiting_confirmation_resolves_the_wait() {
    let log = CallLog::default();
    let adapter = scripted([ScriptStep::tool_calls(
        "",
        vec![call("c1", "edit", json!({"path": "a"}))],
    )]);
    // Keep the receiver alive but never answer.
    let (gateway, _requests) = confirm::channel(4);
    let mut conv =
        conversation(&adapter, registry([guarded_tool("edit", &log)])).with_gateway(gateway);
    let cancel = CancellationToken::new();
    cancel_after(&cancel, Duration::from_millis(30));

    let outcome =
        tokio::time::timeout(Duration::from_secs(5), conv.run_turn(input("edit"), &cancel))
            .await
            .expect("confirmation wait is cancellable");

    assert!(matches!(outcome, TurnOutcome::Cancelled));
    assert!(log.ids().is_empty());
    assert!(tool_results(&conv).is_empty());
}
