//! Conversation orchestration for Helm.
//!
//! A [`Conversation`] owns the transcript and drives each user turn through a
//! [`ModelAdapter`](helm_providers::ModelAdapter): stream a response, pull tool
//! calls out of it, gate them by operating mode and approval, execute, feed the
//! results back, and repeat until the model answers in text.
//!
//! The loop never talks to a terminal. Display layers subscribe to
//! [`TurnEvent`]s and answer confirmations through a [`ConfirmationGateway`].

pub mod categorize;
pub mod config;
pub mod confirm;
pub mod errors;
pub mod events;
pub mod execute;
pub mod extract;
pub mod recovery;
pub mod sanitize;
pub mod turn;

pub use categorize::{Gating, PlannedDisposition, Rejection, RejectionKind, ToolPlan};
pub use config::{ConfigError, EngineConfig, ToolsConfig, TurnConfig};
pub use confirm::{
    ConfirmationDecision, ConfirmationGateway, ConfirmationOutcome, ConfirmationRequest,
};
pub use errors::{TurnError, format_adapter_error};
pub use events::{EventSink, TurnEvent, TurnStatus};
pub use execute::{ExecOutcome, execute_call};
pub use extract::{Extraction, MALFORMED_TOOL_CALL, extract_tool_calls};
pub use sanitize::sanitize_tool_calls;
pub use turn::{CompletionReason, Conversation, TurnCompletion, TurnFailure, TurnOutcome};

pub use helm_providers;
pub use helm_tools;
pub use helm_types;
