//! Deterministic adapter that replays a fixed script of model responses.
//!
//! Each call to [`ModelAdapter::send`] pops the next [`ScriptStep`]. Requests
//! are recorded so callers can assert on what the model was shown.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use helm_types::{ProviderToolCall, StreamEvent};

use crate::{AdapterError, ModelAdapter, ModelRequest, ModelStream};

/// One scripted model response.
#[derive(Debug, Clone)]
pub struct ScriptStep {
    events: Vec<Result<StreamEvent, AdapterError>>,
    /// After the events, wait for cancellation instead of finishing.
    stall: bool,
}

impl ScriptStep {
    /// Plain text answer, optionally split into several deltas.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::deltas([text.into()])
    }

    #[must_use]
    pub fn deltas<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events: Vec<_> = chunks
            .into_iter()
            .map(|chunk| Ok(StreamEvent::TextDelta(chunk.into())))
            .collect();
        events.push(Ok(StreamEvent::Done));
        Self {
            events,
            stall: false,
        }
    }

    /// Structured tool calls, preceded by optional text.
    #[must_use]
    pub fn tool_calls(text: impl Into<String>, calls: Vec<ProviderToolCall>) -> Self {
        let text = text.into();
        let mut events = Vec::new();
        if !text.is_empty() {
            events.push(Ok(StreamEvent::TextDelta(text)));
        }
        events.push(Ok(StreamEvent::ToolCalls(calls)));
        events.push(Ok(StreamEvent::Done));
        Self {
            events,
            stall: false,
        }
    }

    /// A response with no text and no tool calls.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            events: vec![Ok(StreamEvent::Done)],
            stall: false,
        }
    }

    /// Fails immediately with `error`.
    #[must_use]
    pub fn error(error: AdapterError) -> Self {
        Self {
            events: vec![Err(error)],
            stall: false,
        }
    }

    /// Streams `text`, then hangs until the request is cancelled.
    #[must_use]
    pub fn stall_after(text: impl Into<String>) -> Self {
        Self {
            events: vec![Ok(StreamEvent::TextDelta(text.into()))],
            stall: true,
        }
    }

    /// Arbitrary event sequence, for shapes the helpers do not cover.
    #[must_use]
    pub fn events(events: Vec<Result<StreamEvent, AdapterError>>) -> Self {
        Self {
            events,
            stall: false,
        }
    }
}

/// Replays [`ScriptStep`]s in order; fails once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedAdapter {
    #[must_use]
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, step: ScriptStep) {
        lock_unpoisoned(&self.steps).push_back(step);
    }

    /// Every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        lock_unpoisoned(&self.steps).len()
    }
}

impl ModelAdapter for ScriptedAdapter {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn send(&self, request: ModelRequest, cancel: CancellationToken) -> ModelStream {
        lock_unpoisoned(&self.requests).push(request);
        let Some(step) = lock_unpoisoned(&self.steps).pop_front() else {
            tracing::warn!("scripted adapter exhausted");
            return stream::once(async { Err(AdapterError::failed("script exhausted")) }).boxed();
        };

        let head = stream::iter(step.events);
        if step.stall {
            let tail = stream::once(async move {
                cancel.cancelled().await;
                Err(AdapterError::Cancelled)
            });
            head.chain(tail).boxed()
        } else {
            head.boxed()
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
