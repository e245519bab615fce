//! Adapter error taxonomy and raw provider error parsing.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Substrings providers use when a model rejects the tool manifest itself.
const TOOLS_UNSUPPORTED_MARKERS: &[&str] = &[
    "does not support tools",
    "does not support tool use",
    "does not support function calling",
    "tool use is not supported",
    "tools are not supported",
    "tool calling is not supported",
    "function calling is not supported",
    "no endpoints found that support tool use",
];

/// Failure reported by a model adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The request was cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,
    /// The model or provider rejected tool calling itself.
    #[error("tool calling unsupported: {message}")]
    ToolsUnsupported { message: String },
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Transport failure, overload, or an idle stream.
    #[error("provider unavailable: {message}")]
    Unavailable { message: String },
    #[error("{message}")]
    Failed { message: String },
}

impl AdapterError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn tools_unsupported(message: impl Into<String>) -> Self {
        Self::ToolsUnsupported {
            message: message.into(),
        }
    }

    /// Classify raw provider error text (e.g. `API error 429: {...}`).
    ///
    /// Recognised failures keep only the extracted provider message; anything
    /// unrecognised keeps the raw text for later formatting.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (status, body) =
            split_api_error(trimmed).unwrap_or_else(|| (String::new(), trimmed.to_string()));
        let message = extract_error_message(&body).unwrap_or(body);
        let lower = message.to_ascii_lowercase();
        let code = status
            .split_whitespace()
            .next()
            .and_then(|code| code.parse::<u16>().ok());

        if TOOLS_UNSUPPORTED_MARKERS
            .iter()
            .any(|marker| lower.contains(marker))
        {
            return Self::ToolsUnsupported { message };
        }

        if code == Some(429)
            || lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("too many requests")
        {
            return Self::RateLimited {
                message,
                retry_after: None,
            };
        }

        if code.is_some_and(|code| (500..=599).contains(&code))
            || lower.contains("overloaded")
            || lower.contains("service unavailable")
        {
            return Self::Unavailable { message };
        }

        Self::Failed {
            message: trimmed.to_string(),
        }
    }

    /// Raw detail text without the variant prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Cancelled => "request cancelled",
            Self::ToolsUnsupported { message }
            | Self::RateLimited { message, .. }
            | Self::Unavailable { message }
            | Self::Failed { message } => message,
        }
    }
}

#[must_use]
pub fn split_api_error(raw: &str) -> Option<(String, String)> {
    let rest = raw.strip_prefix("API error ")?;
    let (status, body) = rest.split_once(": ")?;
    Some((status.trim().to_string(), body.trim().to_string()))
}

pub fn extract_error_message(raw: &str) -> Option<String> {
    let body = split_api_error(raw).map_or_else(|| raw.trim().to_string(), |(_, body)| body);
    let payload: Value = serde_json::from_str(&body).ok()?;
    payload
        .pointer("/error/message")
        .and_then(|value| value.as_str())
        .or_else(|| {
            payload
                .pointer("/response/error/message")
                .and_then(|value| value.as_str())
        })
        .or_else(|| payload.pointer("/message").and_then(|value| value.as_str()))
        .or_else(|| payload.as_str())
        .map(ToString::to_string)
}

#[must_use]
pub fn is_auth_error(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    let mentions_key =
        lower.contains("api key") || lower.contains("x-api-key") || lower.contains("authorization");
    let auth_words = lower.contains("invalid")
        || lower.contains("incorrect")
        || lower.contains("missing")
        || lower.contains("unauthorized")
        || lower.contains("not provided")
        || lower.contains("authentication");
    let has_code = lower.contains("401");

    lower.contains("invalid_api_key")
        || lower.contains("you must provide an api key")
        || (mentions_key && auth_words)
        || (mentions_key && has_code)
        || (has_code && lower.contains("unauthorized"))
}
