//! Direct execution of a single tool call.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use helm_tools::{ToolCtx, ToolDescriptor, ToolError, truncate_output};
use helm_types::{ToolCall, ToolResult};

use crate::config::ToolsConfig;
use crate::recovery::CANCELLED_BY_USER;

/// Result of running one call.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Finished(ToolResult),
    /// The turn was cancelled while the call was running. Carries the single
    /// "cancelled" result recorded for that call; real output is discarded.
    Cancelled(ToolResult),
}

impl ExecOutcome {
    #[must_use]
    pub fn result(&self) -> &ToolResult {
        match self {
            Self::Finished(result) | Self::Cancelled(result) => result,
        }
    }
}

/// Validate then execute `call` against `tool`.
///
/// Validation failures, execution errors, timeouts, and panics all become an
/// error [`ToolResult`]; nothing here aborts the batch.
pub async fn execute_call(
    tool: &ToolDescriptor,
    call: &ToolCall,
    working_dir: &Path,
    settings: &ToolsConfig,
    cancel: &CancellationToken,
) -> ExecOutcome {
    if let Err(message) = tool.validate(&call.arguments) {
        tracing::warn!(call_id = %call.id, tool = %call.name, %message, "tool arguments rejected");
        return ExecOutcome::Finished(tool_error_result(call, ToolError::BadArgs { message }));
    }

    let ctx = ToolCtx::new(call.id.clone(), working_dir, cancel.child_token());
    let timeout = tool.timeout().unwrap_or_else(|| settings.default_timeout());
    let run = AssertUnwindSafe(tool.execute(call.arguments.clone(), &ctx)).catch_unwind();

    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = tokio::time::timeout(timeout, run) => Some(result),
    };

    let mut result = match outcome {
        None | Some(Ok(Ok(Err(ToolError::Cancelled)))) if cancel.is_cancelled() => {
            tracing::info!(call_id = %call.id, tool = %call.name, "tool call cancelled");
            return ExecOutcome::Cancelled(ToolResult::error_for(call, CANCELLED_BY_USER));
        }
        None => ToolResult::error_for(call, CANCELLED_BY_USER),
        Some(Err(_elapsed)) => tool_error_result(
            call,
            ToolError::Timeout {
                tool: call.name.clone(),
                elapsed: timeout,
            },
        ),
        Some(Ok(Err(panic))) => tool_error_result(
            call,
            ToolError::ExecutionFailed {
                tool: call.name.clone(),
                message: format!("panicked: {}", panic_payload_to_string(panic.as_ref())),
            },
        ),
        Some(Ok(Ok(Err(err)))) => tool_error_result(call, err),
        Some(Ok(Ok(Ok(output)))) => ToolResult::success(call.id.clone(), call.name.clone(), output),
    };
    // Failures can carry command output too; both kinds share the cap.
    result.content = truncate_output(result.content, settings.max_output_bytes);

    if result.is_error {
        tracing::warn!(call_id = %call.id, tool = %call.name, error = %result.content, "tool call failed");
    } else {
        tracing::debug!(call_id = %call.id, tool = %call.name, bytes = result.content.len(), "tool call finished");
    }
    ExecOutcome::Finished(result)
}

pub(crate) fn tool_error_result(call: &ToolCall, err: ToolError) -> ToolResult {
    let message = match err {
        ToolError::BadArgs { message } => format!("Bad args: {message}"),
        ToolError::Timeout { tool, elapsed } => {
            format!("Tool '{tool}' timed out after {}s", elapsed.as_secs())
        }
        ToolError::ExecutionFailed { tool, message } => format!("{tool} failed: {message}"),
        ToolError::Cancelled => CANCELLED_BY_USER.to_string(),
        ToolError::UnknownTool { name } => format!("Unknown tool: {name}"),
        ToolError::DuplicateTool { name } => format!("Duplicate tool: {name}"),
    };
    ToolResult::error_for(call, message)
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
