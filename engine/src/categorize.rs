//! Approval categorization: which calls run now, which need a human, and which
//! are answered without running.

use std::collections::HashSet;

use helm_tools::{RiskLevel, ToolRegistry};
use helm_types::{OperatingMode, ToolCall, ToolResult};

use crate::extract::malformed_error;
use crate::recovery::{plan_mode_violation, unknown_tool_message};

/// Planned disposition for a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedDisposition {
    ExecuteNow,
    RequiresConfirmation,
    PreResolved(Rejection),
}

/// Why a call was answered without executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    MalformedSyntax,
    UnknownTool,
    PlanModeViolation,
    Declined,
    Skipped,
    ConfirmationUnavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub result: ToolResult,
}

impl Rejection {
    pub fn new(kind: RejectionKind, call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            kind,
            result: ToolResult::error_for(call, message),
        }
    }
}

/// Sanitized calls split into buckets, each in original order.
#[derive(Debug, Default)]
pub struct ToolPlan {
    pub execute_now: Vec<ToolCall>,
    pub needs_confirmation: Vec<ToolCall>,
    pub pre_resolved: Vec<Rejection>,
}

/// Inputs that shape gating for one round.
#[derive(Debug, Clone, Copy)]
pub struct Gating<'a> {
    pub registry: &'a ToolRegistry,
    pub mode: OperatingMode,
    /// Tools the user chose to always allow this session.
    pub allowlist: &'a HashSet<String>,
}

impl Gating<'_> {
    /// Disposition for one call.
    #[must_use]
    pub fn disposition(&self, call: &ToolCall) -> PlannedDisposition {
        if let Some(error) = malformed_error(call) {
            return PlannedDisposition::PreResolved(Rejection::new(
                RejectionKind::MalformedSyntax,
                call,
                error,
            ));
        }

        let Some(tool) = self.registry.lookup(&call.name) else {
            return PlannedDisposition::PreResolved(Rejection::new(
                RejectionKind::UnknownTool,
                call,
                unknown_tool_message(&call.name, &self.registry.all_names()),
            ));
        };

        if self.mode == OperatingMode::Plan && tool.is_file_mutating() {
            return PlannedDisposition::PreResolved(Rejection::new(
                RejectionKind::PlanModeViolation,
                call,
                plan_mode_violation(&call.name),
            ));
        }

        if !tool.needs_approval(&call.arguments) || self.allowlist.contains(&call.name) {
            return PlannedDisposition::ExecuteNow;
        }

        match self.mode {
            OperatingMode::AutoAccept if tool.risk_level() < RiskLevel::High => {
                PlannedDisposition::ExecuteNow
            }
            _ => PlannedDisposition::RequiresConfirmation,
        }
    }

    #[must_use]
    pub fn plan(&self, calls: &[ToolCall]) -> ToolPlan {
        let mut plan = ToolPlan::default();
        for call in calls {
            match self.disposition(call) {
                PlannedDisposition::ExecuteNow => plan.execute_now.push(call.clone()),
                PlannedDisposition::RequiresConfirmation => {
                    plan.needs_confirmation.push(call.clone());
                }
                PlannedDisposition::PreResolved(rejection) => {
                    tracing::warn!(
                        call_id = %call.id,
                        tool = %call.name,
                        kind = ?rejection.kind,
                        "tool call rejected before execution"
                    );
                    plan.pre_resolved.push(rejection);
                }
            }
        }
        plan
    }
}
