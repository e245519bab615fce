//! Turn-level errors and their user-facing formatting.

use helm_providers::{AdapterError, extract_error_message, is_auth_error, split_api_error};
use helm_types::{NonEmptyStaticStr, NonEmptyString};

pub const STREAM_ERROR_BADGE: NonEmptyStaticStr = NonEmptyStaticStr::new("[Stream error]");
pub const EMPTY_RESPONSE_BADGE: NonEmptyStaticStr = NonEmptyStaticStr::new("[Empty response]");
const ROUND_LIMIT_BADGE: NonEmptyStaticStr = NonEmptyStaticStr::new("[Round limit]");

const MAX_DETAIL_CHARS: usize = 200;

/// Failure that ends a turn.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TurnError {
    #[error("model request failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("turn exceeded {limit} model rounds")]
    RoundLimitExceeded { limit: u32 },
}

impl TurnError {
    /// Message suitable for showing in place of an assistant reply.
    #[must_use]
    pub fn user_message(&self, model: &str) -> NonEmptyString {
        match self {
            Self::Adapter(err) => format_adapter_error(model, err),
            Self::RoundLimitExceeded { limit } => badge_message(
                ROUND_LIMIT_BADGE,
                &format!(
                    "Stopped after {limit} model calls without a final answer. \
                     Send another message to continue."
                ),
            ),
        }
    }
}

/// Format an adapter error into a user-friendly, badge-prefixed message.
#[must_use]
pub fn format_adapter_error(model: &str, err: &AdapterError) -> NonEmptyString {
    let raw = err.detail().trim();
    let (status, body) = split_api_error(raw).unwrap_or_else(|| (String::new(), raw.to_string()));
    let extracted = extract_error_message(&body).unwrap_or_else(|| body.clone());

    if is_auth_error(&extracted) || is_auth_error(raw) {
        let detail = if status.is_empty() {
            truncate_with_ellipsis(&extracted, MAX_DETAIL_CHARS)
        } else {
            status
        };
        return badge_message(
            STREAM_ERROR_BADGE,
            &format!(
                "Authentication failed for model {model}.\n\nFix:\n- Check the provider API key.\n\
                 - Then retry your message.\n\nDetails: {detail}"
            ),
        );
    }

    let summary = match err {
        AdapterError::Cancelled => "Request cancelled.".to_string(),
        AdapterError::ToolsUnsupported { .. } => {
            format!("Model {model} does not support tool calling.")
        }
        AdapterError::RateLimited { retry_after, .. } => match retry_after {
            Some(wait) => format!("Rate limited. Retry after {}s.", wait.as_secs()),
            None => "Rate limited. Wait a moment and retry.".to_string(),
        },
        AdapterError::Unavailable { .. } => format!("Model {model} is unavailable."),
        AdapterError::Failed { .. } if status.is_empty() => "Request failed.".to_string(),
        AdapterError::Failed { .. } => format!("Request failed ({status})."),
    };

    let detail = extracted.trim();
    if detail.is_empty() {
        return badge_message(STREAM_ERROR_BADGE, &summary);
    }
    badge_message(
        STREAM_ERROR_BADGE,
        &format!(
            "{summary}\n\nDetails: {}",
            truncate_with_ellipsis(detail, MAX_DETAIL_CHARS)
        ),
    )
}

/// Final text for a turn that ended on empty model output.
#[must_use]
pub fn empty_response_message() -> NonEmptyString {
    badge_message(
        EMPTY_RESPONSE_BADGE,
        "The model returned no content. Try rephrasing your request.",
    )
}

fn badge_message(badge: NonEmptyStaticStr, body: &str) -> NonEmptyString {
    NonEmptyString::new(format!("{}\n\n{body}", badge.as_str()))
        .unwrap_or_else(|_| NonEmptyString::from(badge))
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
