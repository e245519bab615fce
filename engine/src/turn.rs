//! The conversation loop.
//!
//! [`Conversation::run_turn`] drives one user turn to completion: it streams a
//! model response, extracts and sanitizes tool calls, gates and executes them,
//! appends every result to the transcript, and re-invokes the model until it
//! answers in plain text. Each call the model issues is answered by exactly one
//! tool result, whether it ran or not.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use helm_providers::{AdapterError, ModelAdapter, ModelRequest};
use helm_tools::{RiskLevel, ToolDescriptor, ToolRegistry};
use helm_types::{
    AssistantMessage, Message, NonEmptyString, OperatingMode, ProviderToolCall, StreamEvent,
    ToolCall, ToolResult, Transcript,
};

use crate::categorize::{Gating, Rejection, RejectionKind};
use crate::config::EngineConfig;
use crate::confirm::{ConfirmationDecision, ConfirmationGateway, ConfirmationOutcome};
use crate::errors::{TurnError, empty_response_message};
use crate::events::{self, EventSink, TurnEvent, TurnStatus};
use crate::execute::{ExecOutcome, execute_call};
use crate::extract::extract_tool_calls;
use crate::recovery::{
    CONFIRMATION_UNAVAILABLE, DECLINED_BY_USER, INTERRUPTED_BEFORE_EXECUTION, NudgeGuard,
    SKIPPED_AFTER_DECLINE, SKIPPED_BY_USER, nudge_text, should_retry_without_tools,
    unknown_tool_message,
};
use crate::sanitize::sanitize_tool_calls;

/// Why a turn completed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The model replied with plain text.
    Answered,
    /// The model kept returning nothing after the allowed nudges.
    EmptyResponse,
    /// Calls needed confirmation that nobody could give.
    ConfirmationUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCompletion {
    pub text: String,
    pub reason: CompletionReason,
}

#[derive(Debug, Clone)]
pub struct TurnFailure {
    pub error: TurnError,
    /// Badge-prefixed text to show in place of an assistant reply.
    pub message: NonEmptyString,
}

/// Terminal state of a turn. Produced exactly once per [`Conversation::run_turn`].
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed(TurnCompletion),
    Cancelled,
    Failed(TurnFailure),
}

impl TurnOutcome {
    #[must_use]
    pub fn status(&self) -> TurnStatus {
        match self {
            Self::Completed(_) => TurnStatus::Completed,
            Self::Cancelled => TurnStatus::Cancelled,
            Self::Failed(_) => TurnStatus::Failed,
        }
    }

    /// Text to show the user, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Completed(completion) => Some(&completion.text),
            Self::Cancelled => None,
            Self::Failed(failure) => Some(failure.message.as_str()),
        }
    }
}

enum Step {
    Continue,
    Finish(TurnOutcome),
}

struct TurnState {
    cancel: CancellationToken,
    round: u32,
    retry_without_tools: bool,
    nudges: NudgeGuard,
}

#[derive(Default)]
struct ModelResponse {
    text: String,
    calls: Vec<ProviderToolCall>,
}

/// A session with one model: transcript, tools, and session-scoped approvals.
pub struct Conversation {
    adapter: Arc<dyn ModelAdapter>,
    registry: ToolRegistry,
    config: EngineConfig,
    system_prompt: Option<NonEmptyString>,
    mode: OperatingMode,
    non_interactive: bool,
    gateway: Option<ConfirmationGateway>,
    events: EventSink,
    working_dir: PathBuf,
    transcript: Transcript,
    allowlist: HashSet<String>,
}

impl Conversation {
    #[must_use]
    pub fn new(adapter: Arc<dyn ModelAdapter>, registry: ToolRegistry) -> Self {
        Self {
            adapter,
            registry,
            config: EngineConfig::default(),
            system_prompt: None,
            mode: OperatingMode::default(),
            non_interactive: false,
            gateway: None,
            events: EventSink::disabled(),
            working_dir: PathBuf::from("."),
            transcript: Transcript::new(),
            allowlist: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: NonEmptyString) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Calls that need confirmation are answered with an error result and
    /// the turn ends instead of waiting.
    #[must_use]
    pub fn non_interactive(mut self, non_interactive: bool) -> Self {
        self.non_interactive = non_interactive;
        self
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: ConfirmationGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Route events to a fresh channel sized by `turn.event_channel_capacity`.
    ///
    /// Replaces any sink installed earlier.
    pub fn subscribe(&mut self) -> mpsc::Receiver<TurnEvent> {
        let (sink, rx) = events::channel(self.config.turn.event_channel_capacity);
        self.events = sink;
        rx
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Resume from an earlier transcript.
    #[must_use]
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = transcript;
        self
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    #[must_use]
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: OperatingMode) {
        tracing::info!(from = %self.mode, to = %mode, "operating mode changed");
        self.mode = mode;
    }

    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Tools the user chose to always allow this session.
    #[must_use]
    pub fn allowlist(&self) -> &HashSet<String> {
        &self.allowlist
    }

    /// Run one user turn until the model answers, the turn fails, or `cancel`
    /// fires.
    pub async fn run_turn(
        &mut self,
        input: NonEmptyString,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let turn_cancel = cancel.child_token();
        // Anything still holding a child of this token stops when the turn ends.
        let _release = turn_cancel.clone().drop_guard();

        self.repair_dangling_calls();
        self.transcript.push(Message::user(input));

        tracing::info!(
            model = self.adapter.model_name(),
            mode = %self.mode,
            non_interactive = self.non_interactive,
            "turn started"
        );

        let mut state = TurnState {
            cancel: turn_cancel,
            round: 0,
            retry_without_tools: false,
            nudges: NudgeGuard::new(self.config.turn.max_consecutive_nudges),
        };
        let outcome = loop {
            match self.advance(&mut state).await {
                Step::Continue => {}
                Step::Finish(outcome) => break outcome,
            }
        };

        tracing::info!(rounds = state.round, status = ?outcome.status(), "turn finished");
        self.events.emit(TurnEvent::TurnFinished(outcome.status()));
        outcome
    }

    /// One model round and the tool calls it produced.
    async fn advance(&mut self, state: &mut TurnState) -> Step {
        if state.cancel.is_cancelled() {
            return Step::Finish(TurnOutcome::Cancelled);
        }
        let limit = self.config.turn.max_rounds;
        if state.round >= limit {
            return self.fail(TurnError::RoundLimitExceeded { limit });
        }
        state.round += 1;
        tracing::debug!(
            round = state.round,
            tools = !state.retry_without_tools,
            "requesting model response"
        );

        let response = match self.stream_response(state).await {
            Ok(response) => response,
            Err(_) if state.cancel.is_cancelled() => return Step::Finish(TurnOutcome::Cancelled),
            Err(AdapterError::Cancelled) => return Step::Finish(TurnOutcome::Cancelled),
            Err(err) if should_retry_without_tools(&err, state.retry_without_tools) => {
                tracing::warn!(%err, "model rejected tool definitions; retrying without tools");
                state.retry_without_tools = true;
                self.events.emit(TurnEvent::RetryingWithoutTools);
                return Step::Continue;
            }
            Err(err) => return self.fail(err.into()),
        };

        let extraction =
            extract_tool_calls(&response.text, response.calls, &self.registry.all_names());
        let calls = sanitize_tool_calls(extraction.calls);
        let display = extraction.display_text;
        self.events.emit(TurnEvent::AssistantText(display.clone()));

        let Some((first, rest)) = calls.split_first() else {
            return self.finish_without_calls(display, state);
        };
        tracing::debug!(count = calls.len(), "model requested tool calls");
        state.nudges.reset();
        self.transcript
            .push(Message::tool_use(display, first.clone(), rest.iter().cloned()));

        self.process_calls(&calls, state).await
    }

    async fn stream_response(&self, state: &TurnState) -> Result<ModelResponse, AdapterError> {
        let tools = if state.retry_without_tools {
            Vec::new()
        } else {
            self.registry.definitions()
        };
        let request = ModelRequest::new(
            self.system_prompt.clone(),
            self.transcript.as_slice().to_vec(),
            tools,
        );
        let mut stream = self.adapter.send(request, state.cancel.clone());
        let idle = self.config.turn.stream_idle_timeout();
        let mut response = ModelResponse::default();

        loop {
            let next = tokio::select! {
                biased;
                () = state.cancel.cancelled() => return Err(AdapterError::Cancelled),
                next = tokio::time::timeout(idle, stream.next()) => next,
            };
            match next {
                Err(_elapsed) => {
                    return Err(AdapterError::unavailable(format!(
                        "no data from model for {}s",
                        idle.as_secs()
                    )));
                }
                Ok(None | Some(Ok(StreamEvent::Done))) => break,
                Ok(Some(Err(err))) => return Err(err),
                Ok(Some(Ok(StreamEvent::TextDelta(delta)))) => {
                    response.text.push_str(&delta);
                    self.events.emit(TurnEvent::TextDelta(delta));
                }
                Ok(Some(Ok(StreamEvent::ToolCalls(calls)))) => response.calls.extend(calls),
            }
        }
        Ok(response)
    }

    fn finish_without_calls(&mut self, text: String, state: &mut TurnState) -> Step {
        if let Ok(content) = NonEmptyString::new(text.clone()) {
            self.transcript
                .push(Message::Assistant(AssistantMessage::text(content)));
            return Step::Finish(TurnOutcome::Completed(TurnCompletion {
                text,
                reason: CompletionReason::Answered,
            }));
        }

        let after_tool_result = self
            .transcript
            .last()
            .is_some_and(Message::is_tool_result);
        if state.nudges.try_nudge() {
            tracing::info!(after_tool_result, "empty model response; nudging");
            self.transcript
                .push(Message::user(nudge_text(after_tool_result).into()));
            self.events
                .emit(TurnEvent::NudgeInjected { after_tool_result });
            return Step::Continue;
        }

        tracing::warn!("model returned no usable output; ending turn");
        Step::Finish(TurnOutcome::Completed(TurnCompletion {
            text: empty_response_message().into_inner(),
            reason: CompletionReason::EmptyResponse,
        }))
    }

    async fn process_calls(&mut self, calls: &[ToolCall], state: &mut TurnState) -> Step {
        let plan = Gating {
            registry: &self.registry,
            mode: self.mode,
            allowlist: &self.allowlist,
        }
        .plan(calls);

        for rejection in plan.pre_resolved {
            self.record_rejection(rejection);
        }

        for call in &plan.execute_now {
            if let ControlFlow::Break(outcome) = self.execute(call, state).await {
                return Step::Finish(outcome);
            }
        }

        if plan.needs_confirmation.is_empty() {
            return Step::Continue;
        }
        self.confirm_and_execute(&plan.needs_confirmation, state)
            .await
    }

    async fn confirm_and_execute(&mut self, calls: &[ToolCall], state: &mut TurnState) -> Step {
        let gateway = match &self.gateway {
            Some(gateway) if !self.non_interactive => gateway.clone(),
            _ => return self.confirmation_unavailable(calls),
        };

        for (index, call) in calls.iter().enumerate() {
            if self.allowlist.contains(&call.name) {
                if let ControlFlow::Break(outcome) = self.execute(call, state).await {
                    return Step::Finish(outcome);
                }
                continue;
            }

            let risk = self
                .registry
                .lookup(&call.name)
                .map_or(RiskLevel::High, ToolDescriptor::risk_level);
            self.events
                .emit(TurnEvent::ConfirmationRequested(call.clone()));

            let decision = match gateway.request(call, risk, &state.cancel).await {
                ConfirmationOutcome::Decided(decision) => decision,
                ConfirmationOutcome::Cancelled => return Step::Finish(TurnOutcome::Cancelled),
                ConfirmationOutcome::Unavailable => {
                    return self.confirmation_unavailable(&calls[index..]);
                }
            };
            tracing::debug!(call_id = %call.id, tool = %call.name, ?decision, "confirmation answered");

            match decision {
                ConfirmationDecision::Approve => {}
                ConfirmationDecision::AlwaysAllow => {
                    tracing::info!(tool = %call.name, "tool allowed for the rest of the session");
                    self.allowlist.insert(call.name.clone());
                }
                ConfirmationDecision::Skip => {
                    self.record_rejection(Rejection::new(
                        RejectionKind::Skipped,
                        call,
                        SKIPPED_BY_USER,
                    ));
                    continue;
                }
                ConfirmationDecision::Decline => {
                    self.record_rejection(Rejection::new(
                        RejectionKind::Declined,
                        call,
                        DECLINED_BY_USER,
                    ));
                    for later in &calls[index + 1..] {
                        self.record_rejection(Rejection::new(
                            RejectionKind::Skipped,
                            later,
                            SKIPPED_AFTER_DECLINE,
                        ));
                    }
                    break;
                }
            }

            if let ControlFlow::Break(outcome) = self.execute(call, state).await {
                return Step::Finish(outcome);
            }
        }
        Step::Continue
    }

    /// Run one call and record its result. Breaks when the turn was cancelled.
    async fn execute(&mut self, call: &ToolCall, state: &TurnState) -> ControlFlow<TurnOutcome> {
        if state.cancel.is_cancelled() {
            return ControlFlow::Break(TurnOutcome::Cancelled);
        }
        let Some(tool) = self.registry.lookup(&call.name) else {
            let message = unknown_tool_message(&call.name, &self.registry.all_names());
            self.record_rejection(Rejection::new(RejectionKind::UnknownTool, call, message));
            return ControlFlow::Continue(());
        };

        self.events.emit(TurnEvent::ToolStarted(call.clone()));
        let outcome = execute_call(
            tool,
            call,
            &self.working_dir,
            &self.config.tools,
            &state.cancel,
        )
        .await;

        let (result, cancelled) = match outcome {
            ExecOutcome::Finished(result) => (result, false),
            ExecOutcome::Cancelled(result) => (result, true),
        };
        self.record_result(result);
        if cancelled {
            ControlFlow::Break(TurnOutcome::Cancelled)
        } else {
            ControlFlow::Continue(())
        }
    }

    fn confirmation_unavailable(&mut self, pending: &[ToolCall]) -> Step {
        tracing::info!(
            pending = pending.len(),
            "confirmation unavailable; answering pending calls and ending turn"
        );
        for call in pending {
            self.record_rejection(Rejection::new(
                RejectionKind::ConfirmationUnavailable,
                call,
                CONFIRMATION_UNAVAILABLE,
            ));
        }
        let names: Vec<&str> = pending.iter().map(|call| call.name.as_str()).collect();
        Step::Finish(TurnOutcome::Completed(TurnCompletion {
            text: format!(
                "Stopped: {} tool call(s) need confirmation ({}).",
                pending.len(),
                names.join(", ")
            ),
            reason: CompletionReason::ConfirmationUnavailable,
        }))
    }

    /// Answer calls left without results by an earlier interrupted turn, so the
    /// next request satisfies the provider's call/result pairing.
    fn repair_dangling_calls(&mut self) {
        for call in self.transcript.unanswered_tool_calls() {
            tracing::debug!(call_id = %call.id, tool = %call.name, "answering dangling tool call");
            self.transcript.push(Message::tool_result(ToolResult::error_for(
                &call,
                INTERRUPTED_BEFORE_EXECUTION,
            )));
        }
    }

    fn record_result(&mut self, result: ToolResult) {
        self.events.emit(TurnEvent::ToolFinished(result.clone()));
        self.transcript.push(Message::tool_result(result));
    }

    fn record_rejection(&mut self, rejection: Rejection) {
        self.events.emit(TurnEvent::ToolRejected {
            result: rejection.result.clone(),
            kind: rejection.kind,
        });
        self.transcript.push(Message::tool_result(rejection.result));
    }

    fn fail(&self, error: TurnError) -> Step {
        tracing::error!(%error, "turn failed");
        let message = error.user_message(self.adapter.model_name());
        Step::Finish(TurnOutcome::Failed(TurnFailure { error, message }))
    }
}
