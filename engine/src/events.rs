//! Notifications for the display layer.

use tokio::sync::mpsc;

use helm_types::{ToolCall, ToolResult};

use crate::categorize::RejectionKind;

/// Something the display layer may want to render.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// Raw streamed text, forwarded before extraction runs.
    ///
    /// Superseded by [`TurnEvent::AssistantText`] once the response is
    /// complete and tool-call syntax has been removed. When the response
    /// turns out to be malformed the following `AssistantText` is empty, and
    /// renderers must discard the deltas they already showed for it.
    TextDelta(String),
    /// Final display text for one model response. Empty for malformed output.
    AssistantText(String),
    ToolStarted(ToolCall),
    ToolFinished(ToolResult),
    /// A call answered without running (policy, unknown tool, malformed, declined).
    ToolRejected {
        result: ToolResult,
        kind: RejectionKind,
    },
    ConfirmationRequested(ToolCall),
    NudgeInjected { after_tool_result: bool },
    RetryingWithoutTools,
    TurnFinished(TurnStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Best-effort event sender. A full or closed channel drops the event.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TurnEvent>>,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: TurnEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(event) {
            tracing::debug!("turn event dropped: {err}");
        }
    }
}

/// Event channel sized for a turn's worth of events.
#[must_use]
pub fn channel(capacity: usize) -> (EventSink, mpsc::Receiver<TurnEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink::new(tx), rx)
}
