//! Blank-field and duplicate filtering for tool calls before they run.

use std::collections::HashSet;

use helm_types::ToolCall;

/// Drop calls with a blank id or name, then collapse duplicates.
///
/// A call is a duplicate when it repeats an earlier id, or when it repeats an
/// earlier call's name and arguments under a different id. The first
/// occurrence wins and order is preserved.
#[must_use]
pub fn sanitize_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_signatures: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(calls.len());

    for call in calls {
        if call.id.trim().is_empty() || call.name.trim().is_empty() {
            tracing::warn!(call_id = %call.id, tool = %call.name, "dropping tool call without id or name");
            continue;
        }
        if seen_ids.contains(&call.id) {
            tracing::debug!(call_id = %call.id, "dropping tool call with repeated id");
            continue;
        }
        let signature = call.signature();
        if seen_signatures.contains(&signature) {
            tracing::debug!(call_id = %call.id, tool = %call.name, "dropping repeated tool call");
            continue;
        }
        seen_ids.insert(call.id.clone());
        seen_signatures.insert(signature);
        kept.push(call);
    }
    kept
}
