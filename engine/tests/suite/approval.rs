//! Confirmation flow: approve, skip, decline, always-allow, and no responder.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use helm_engine::helm_providers::scripted::ScriptStep;
use helm_engine::recovery::{
    CONFIRMATION_UNAVAILABLE, DECLINED_BY_USER, SKIPPED_AFTER_DECLINE, SKIPPED_BY_USER,
};
use helm_engine::{
    CompletionReason, ConfirmationDecision, RejectionKind, TurnEvent, TurnOutcome, confirm,
    events,
};

use crate::common::{
    CallLog, call, conversation, drain, guarded_tool, input, recording_tool, registry,
    respond_with, scripted, tool_results,
};

#[tokio::test]
async fn decline_skips_the_rest_of_the_batch() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls(
            "",
            vec![
                call("c1", "edit", json!({"path": "a"})),
                call("c2", "edit", json!({"path": "b"})),
                call("c3", "edit", json!({"path": "c"})),
            ],
        ),
        ScriptStep::text("Understood."),
    ]);
    let (gateway, requests) = confirm::channel(4);
    let responder = respond_with(requests, vec![ConfirmationDecision::Decline]);
    let (sink, mut rx) = events::channel(64);
    let mut conv = conversation(&adapter, registry([guarded_tool("edit", &log)]))
        .with_gateway(gateway)
        .with_events(sink);

    let outcome = conv.run_turn(input("edit all"), &CancellationToken::new()).await;

    assert_eq!(outcome.text(), Some("Understood."));
    assert_eq!(responder.await.unwrap(), vec!["c1"]);
    assert!(log.ids().is_empty());

    let results = tool_results(&conv);
    let contents: Vec<(&str, &str)> = results
        .iter()
        .map(|r| (r.tool_call_id.as_str(), r.content.as_str()))
        .collect();
    assert_eq!(
        contents,
        vec![
            ("c1", DECLINED_BY_USER),
            ("c2", SKIPPED_AFTER_DECLINE),
            ("c3", SKIPPED_AFTER_DECLINE),
        ]
    );
    assert!(results.iter().all(|r| r.is_error));

    let declined = drain(&mut rx)
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                TurnEvent::ToolRejected {
                    kind: RejectionKind::Declined,
                    ..
                }
            )
        })
        .count();
    assert_eq!(declined, 1);
}

#[tokio::test]
async fn approve_runs_and_skip_only_skips_one() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls(
            "",
            vec![
                call("c1", "edit", json!({"path": "a"})),
                call("c2", "edit", json!({"path": "b"})),
                call("c3", "edit", json!({"path": "c"})),
            ],
        ),
        ScriptStep::text("ok"),
    ]);
    let (gateway, requests) = confirm::channel(4);
    let responder = respond_with(
        requests,
        vec![
            ConfirmationDecision::Approve,
            ConfirmationDecision::Skip,
            ConfirmationDecision::Approve,
        ],
    );
    let mut conv =
        conversation(&adapter, registry([guarded_tool("edit", &log)])).with_gateway(gateway);

    conv.run_turn(input("edit"), &CancellationToken::new()).await;

    assert_eq!(responder.await.unwrap(), vec!["c1", "c2", "c3"]);
    assert_eq!(log.ids(), vec!["c1", "c3"]);
    let results = tool_results(&conv);
    assert_eq!(results[1].tool_call_id, "c2");
    assert_eq!(results[1].content, SKIPPED_BY_USER);
    assert!(conv.allowlist().is_empty());
}

#[tokio::test]
async fn always_allow_stops_asking_for_that_tool() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls("", vec![call("c1", "edit", json!({"path": "a"}))]),
        ScriptStep::text("first done"),
        ScriptStep::tool_calls("", vec![call("c2", "edit", json!({"path": "b"}))]),
        ScriptStep::text("second done"),
    ]);
    let (gateway, requests) = confirm::channel(4);
    let responder = respond_with(requests, vec![ConfirmationDecision::AlwaysAllow]);
    let mut conv =
        conversation(&adapter, registry([guarded_tool("edit", &log)])).with_gateway(gateway);

    let cancel = CancellationToken::new();
    conv.run_turn(input("one"), &cancel).await;
    assert_eq!(responder.await.unwrap(), vec!["c1"]);
    assert!(conv.allowlist().contains("edit"));

    let outcome = conv.run_turn(input("two"), &cancel).await;
    assert_eq!(outcome.text(), Some("second done"));
    assert_eq!(log.ids(), vec!["c1", "c2"]);
}

#[tokio::test]
async fn non_interactive_answers_pending_calls_without_recursing() {
    let log = CallLog::default();
    let adapter = scripted([
        ScriptStep::tool_calls(
            "",
            vec![
                call("c1", "lookup", json!({})),
                call("c2", "edit", json!({"path": "a"})),
            ],
        ),
        ScriptStep::text("not reached"),
    ]);
    let (gateway, _requests) = confirm::channel(4);
    let mut conv = conversation(
        &adapter,
        registry([recording_tool("lookup", &log), guarded_tool("edit", &log)]),
    )
    .with_gateway(gateway)
    .non_interactive(true);

    let outcome = conv.run_turn(input("go"), &CancellationToken::new()).await;

    let TurnOutcome::Completed(done) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(done.reason, CompletionReason::ConfirmationUnavailable);
    assert!(done.text.contains("edit"));
    assert_eq!(log.ids(), vec!["c1"]);
    assert_eq!(adapter.requests().len(), 1);

    let results = tool_results(&conv);
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].tool_call_id, "c2");
    assert_eq!(results[1].content, CONFIRMATION_UNAVAILABLE);
    assert!(conv.transcript().unanswered_tool_calls().is_empty());
}

#[tokio::test]
async fn closed_confirmation_channel_is_treated_as_unavailable() {
    let log = CallLog::default();
    let adapter = scripted([ScriptStep::tool_calls(
        "",
        vec![
            call("c1", "edit", json!({"path": "a"})),
            call("c2", "edit", json!({"path": "b"})),
        ],
    )]);
    let (gateway, requests) = confirm::channel(4);
    drop(requests);
    let mut conv =
        conversation(&adapter, registry([guarded_tool("edit", &log)])).with_gateway(gateway);

    let outcome = conv.run_turn(input("edit"), &CancellationToken::new()).await;

    assert!(matches!(
        outcome,
        TurnOutcome::Completed(ref done) if done.reason == CompletionReason::ConfirmationUnavailable
    ));
    assert!(log.ids().is_empty());
    assert_eq!(tool_results(&conv).len(), 2);
}
