//! Recovery policies: result texts for calls that do not run, the empty-response
//! nudge, and the single-shot retry without tools.

use helm_providers::AdapterError;
use helm_types::NonEmptyStaticStr;

pub const CANCELLED_BY_USER: &str = "Cancelled by user";
pub const DECLINED_BY_USER: &str = "Tool call declined by user.";
pub const SKIPPED_BY_USER: &str = "Skipped by user.";
pub const SKIPPED_AFTER_DECLINE: &str =
    "Skipped: an earlier tool call in this batch was declined by the user.";
pub const CONFIRMATION_UNAVAILABLE: &str = "Not executed: this tool call requires user \
     confirmation, which is unavailable in non-interactive mode.";
pub const INTERRUPTED_BEFORE_EXECUTION: &str =
    "Not executed: the previous turn was interrupted before this tool call ran.";

const NUDGE_AFTER_TOOL_RESULT: NonEmptyStaticStr = NonEmptyStaticStr::new(
    "Continue with the task using the tool results above. \
     If the task is complete, reply with a short summary.",
);
const NUDGE_GENERIC: NonEmptyStaticStr = NonEmptyStaticStr::new(
    "Your last response was empty. Continue with the task, or reply with your final answer.",
);

#[must_use]
pub fn unknown_tool_message(name: &str, available: &[String]) -> String {
    if available.is_empty() {
        format!("Unknown tool: '{name}'. No tools are available.")
    } else {
        format!(
            "Unknown tool: '{name}'. Available tools: {}.",
            available.join(", ")
        )
    }
}

#[must_use]
pub fn plan_mode_violation(name: &str) -> String {
    format!(
        "Tool '{name}' modifies files and cannot run in plan mode. \
         Use read-only tools, or ask the user to leave plan mode."
    )
}

#[must_use]
pub fn nudge_text(after_tool_result: bool) -> NonEmptyStaticStr {
    if after_tool_result {
        NUDGE_AFTER_TOOL_RESULT
    } else {
        NUDGE_GENERIC
    }
}

/// Bounds back-to-back nudges. Any productive round resets it.
#[derive(Debug, Clone)]
pub struct NudgeGuard {
    consecutive: u32,
    max: u32,
}

impl NudgeGuard {
    #[must_use]
    pub fn new(max: u32) -> Self {
        Self {
            consecutive: 0,
            max,
        }
    }

    /// Records a nudge if one is still allowed.
    pub fn try_nudge(&mut self) -> bool {
        if self.consecutive >= self.max {
            return false;
        }
        self.consecutive += 1;
        true
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Whether `err` warrants re-sending the turn without the tool manifest.
#[must_use]
pub fn should_retry_without_tools(err: &AdapterError, already_retried: bool) -> bool {
    !already_retried && matches!(err, AdapterError::ToolsUnsupported { .. })
}
