//! Tool-call extraction from model output.
//!
//! Combines the structured calls a provider reports with calls written into
//! the response text. Two text forms are recognised:
//!
//! - `<tool_name><param>value</param>...</tool_name>` for any registered tool
//! - `<tool_call>{"name": ..., "arguments": {...}}</tool_call>`
//!
//! Text that looks like tool-call syntax but cannot be parsed (unsupported
//! shorthands, unterminated tags, bad JSON) is reported as malformed. The whole
//! response text is then discarded and a single synthetic call carrying the
//! parse error takes its place.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use helm_types::{ProviderToolCall, ToolCall};

/// Reserved tool name for the synthetic call standing in for malformed syntax.
pub const MALFORMED_TOOL_CALL: &str = "__malformed_tool_call__";

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";

struct Patterns {
    function_shorthand: Regex,
    tool_use_shorthand: Regex,
    param_open: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    function_shorthand: Regex::new(r"<function=([^>\s]*)>?").expect("valid function shorthand regex"),
    tool_use_shorthand: Regex::new(r"\[tool_use:\s*([^\]\s]*)\s*\]?")
        .expect("valid tool_use shorthand regex"),
    param_open: Regex::new(r"<([A-Za-z_][A-Za-z0-9_.\-]*)>").expect("valid parameter tag regex"),
});

/// Result of extracting tool calls from one model response.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Response text with tool-call spans removed. Empty when malformed.
    pub display_text: String,
    /// Structured calls first, then text calls in order of appearance.
    pub calls: Vec<ToolCall>,
    /// Parse error when the text contained malformed tool-call syntax.
    pub malformed: Option<String>,
}

/// Extract tool calls from `text` and the provider's structured calls.
///
/// `known_tools` names the tags treated as tool invocations.
#[must_use]
pub fn extract_tool_calls(
    text: &str,
    structured: Vec<ProviderToolCall>,
    known_tools: &[String],
) -> Extraction {
    let mut calls: Vec<ToolCall> = structured.into_iter().map(from_provider).collect();

    match scan_text(text, known_tools) {
        Ok((display_text, text_calls)) => {
            calls.extend(text_calls);
            Extraction {
                display_text,
                calls,
                malformed: None,
            }
        }
        Err(error) => {
            tracing::warn!(%error, "malformed tool-call syntax in model output");
            calls.push(ToolCall::new(
                fallback_id(),
                MALFORMED_TOOL_CALL,
                json!({ "error": error.as_str() }),
            ));
            Extraction {
                display_text: String::new(),
                calls,
                malformed: Some(error),
            }
        }
    }
}

/// Error text carried by a synthetic malformed-call, if `call` is one.
#[must_use]
pub fn malformed_error(call: &ToolCall) -> Option<&str> {
    if call.name != MALFORMED_TOOL_CALL {
        return None;
    }
    call.arguments.get("error").and_then(Value::as_str)
}

fn fallback_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

fn from_provider(call: ProviderToolCall) -> ToolCall {
    let id = call
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(fallback_id);
    let arguments = parse_arguments_value(Some(&call.arguments));
    ToolCall::new(id, call.name.trim(), arguments)
}

/// Normalise provider arguments: JSON-encoded strings are decoded, absent or
/// null arguments become an empty object.
fn parse_arguments_value(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::String(s)) if s.trim().is_empty() => Value::Object(Map::new()),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s).unwrap_or_else(|err| {
            tracing::warn!(%err, "tool arguments string is not valid JSON");
            Value::Object(Map::new())
        }),
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(value) => value.clone(),
    }
}

fn scan_text(text: &str, known_tools: &[String]) -> Result<(String, Vec<ToolCall>), String> {
    // Every candidate opening tag, in text order.
    let mut openings: Vec<(usize, Option<&str>)> = text
        .match_indices(TOOL_CALL_OPEN)
        .map(|(start, _)| (start, None))
        .collect();
    for name in known_tools {
        let open = format!("<{name}>");
        openings.extend(text.match_indices(&open).map(|(start, _)| (start, Some(name.as_str()))));
    }
    openings.sort_by_key(|(start, _)| *start);

    let mut calls = Vec::new();
    let mut display = String::with_capacity(text.len());
    let mut consumed = 0usize;

    for (start, tool) in openings {
        if start < consumed {
            continue;
        }
        let (call, end) = match tool {
            None => parse_tool_call_block(text, start)?,
            Some(name) => parse_tool_tag(text, start, name)?,
        };
        display.push_str(&text[consumed..start]);
        calls.push(call);
        consumed = end;
    }
    display.push_str(&text[consumed..]);

    // Shorthands only count outside well-formed spans; parameter values may
    // legitimately mention them.
    reject_shorthands(&display)?;

    if calls.is_empty() {
        return Ok((text.to_string(), calls));
    }
    Ok((display.trim().to_string(), calls))
}

fn reject_shorthands(outside_spans: &str) -> Result<(), String> {
    if let Some(caps) = PATTERNS.function_shorthand.captures(outside_spans) {
        return Err(format!(
            "Malformed tool call: `<function={}>` is not a supported tool-call syntax. \
             Call tools as <tool_name><param>value</param></tool_name>.",
            &caps[1]
        ));
    }
    if let Some(caps) = PATTERNS.tool_use_shorthand.captures(outside_spans) {
        return Err(format!(
            "Malformed tool call: `[tool_use: {}]` is not a supported tool-call syntax. \
             Call tools as <tool_name><param>value</param></tool_name>.",
            &caps[1]
        ));
    }
    Ok(())
}

/// Parses `<tool_call>{json}</tool_call>` at `start`; returns the call and span end.
fn parse_tool_call_block(text: &str, start: usize) -> Result<(ToolCall, usize), String> {
    let body_start = start + TOOL_CALL_OPEN.len();
    let Some(close) = text[body_start..].find(TOOL_CALL_CLOSE) else {
        return Err("Malformed tool call: unterminated <tool_call> tag.".to_string());
    };
    let body = text[body_start..body_start + close].trim();
    let end = body_start + close + TOOL_CALL_CLOSE.len();

    let value: Value = serde_json::from_str(body)
        .map_err(|e| format!("Malformed tool call: <tool_call> body is not valid JSON ({e})."))?;
    let function = value.get("function").unwrap_or(&value);
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if name.is_empty() {
        return Err("Malformed tool call: <tool_call> body has no tool name.".to_string());
    }
    let arguments = parse_arguments_value(
        function
            .get("arguments")
            .or_else(|| function.get("parameters"))
            .or_else(|| function.get("input")),
    );
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map_or_else(fallback_id, ToString::to_string);

    Ok((ToolCall::new(id, name, arguments), end))
}

/// Parses `<name><param>value</param>...</name>` at `start`.
fn parse_tool_tag(text: &str, start: usize, name: &str) -> Result<(ToolCall, usize), String> {
    let open_len = name.len() + 2;
    let close = format!("</{name}>");
    let body_start = start + open_len;
    let Some(close_at) = text[body_start..].find(&close) else {
        return Err(format!("Malformed tool call: unterminated <{name}> tag."));
    };
    let body = &text[body_start..body_start + close_at];
    let end = body_start + close_at + close.len();

    let arguments = parse_parameters(body, name)?;
    Ok((ToolCall::new(fallback_id(), name, arguments), end))
}

fn parse_parameters(body: &str, tool: &str) -> Result<Value, String> {
    let mut params = Map::new();
    let mut cursor = 0usize;

    while let Some(caps) = PATTERNS.param_open.captures_at(body, cursor) {
        let (Some(whole), Some(tag)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let param = tag.as_str();
        let close = format!("</{param}>");
        let value_start = whole.end();
        let Some(close_at) = body[value_start..].find(&close) else {
            return Err(format!(
                "Malformed tool call: unterminated <{param}> parameter in <{tool}>."
            ));
        };
        let raw = &body[value_start..value_start + close_at];
        params.insert(param.to_string(), parameter_value(raw));
        cursor = value_start + close_at + close.len();
    }

    if params.is_empty() {
        let trimmed = body.trim();
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            return Ok(Value::Object(map));
        }
    }
    Ok(Value::Object(params))
}

/// Numbers, booleans, arrays, and objects keep their JSON type; anything else is a string.
fn parameter_value(raw: &str) -> Value {
    let raw = raw.strip_prefix('\n').unwrap_or(raw);
    let raw = raw.strip_suffix('\n').unwrap_or(raw);
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Array(_) | Value::Object(_))) => {
            value
        }
        _ => Value::String(raw.to_string()),
    }
}
