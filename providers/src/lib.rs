//! Model adapter contract with unified streaming support.
//!
//! # Architecture
//!
//! The orchestrator talks to every provider through [`ModelAdapter::send`], which
//! returns a [`ModelStream`]: an incremental sequence of [`StreamEvent`]s, each
//! carrying partial text, structured tool calls, or the final `Done` marker.
//!
//! Provider HTTP clients live outside this crate. What lives here is the part
//! every client shares:
//!
//! - [`ModelRequest`] - system prompt, history, and the tool manifest for one call
//! - [`AdapterError`] - the error taxonomy the conversation loop reacts to
//! - [`scripted`] - a deterministic adapter for tests and offline runs
//!
//! # Error Handling
//!
//! Adapter failures are yielded as `Err` items on the stream, so partial output
//! that arrived before the failure has already been observed by the caller.
//! [`AdapterError::classify`] maps raw provider error text onto the taxonomy.

mod error;
pub mod scripted;

pub use error::{AdapterError, extract_error_message, is_auth_error, split_api_error};

use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

pub use helm_types;
use helm_types::{Message, NonEmptyString, StreamEvent, ToolDefinition};

/// Incremental response from one model call.
pub type ModelStream = BoxStream<'static, Result<StreamEvent, AdapterError>>;

/// Everything a provider needs for one model call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_prompt: Option<NonEmptyString>,
    pub messages: Vec<Message>,
    /// Tool manifest. Empty when the turn is retrying without tools.
    pub tools: Vec<ToolDefinition>,
}

impl ModelRequest {
    #[must_use]
    pub fn new(
        system_prompt: Option<NonEmptyString>,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            system_prompt,
            messages,
            tools,
        }
    }

    #[must_use]
    pub fn tools_enabled(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// Streaming model client.
///
/// Implementations must stop producing events promptly once `cancel` fires,
/// either by ending the stream or yielding [`AdapterError::Cancelled`].
pub trait ModelAdapter: Send + Sync {
    /// Model identifier used in logs and error messages.
    fn model_name(&self) -> &str;

    fn send(&self, request: ModelRequest, cancel: CancellationToken) -> ModelStream;
}
